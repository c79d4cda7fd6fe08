use crate::commands::{PipelineState, ScraperStatus, SupervisorCommand, SupervisorError};
use crate::handle::SupervisorHandle;
use crate::stage::{spawn_stage, StageHandle};
use coinpulse_core::{DataConfig, EventBus, PipelineEvent, Stage, SupervisorConfig};
use coinpulse_store::{CoinStore, ScrapeStore};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

#[derive(Debug)]
enum InternalEvent {
    ScraperExited(Option<i32>),
    ProcessingFinished(Result<usize, (Stage, String)>),
}

struct RunningScraper {
    pid: u32,
    kill_tx: oneshot::Sender<()>,
}

/// Owns the pipeline lifecycle: launches stage child processes, reacts to
/// scrape-store changes with a debounce, and guarantees at most one stage
/// alive at any time.
///
/// Single-tasked: every state transition happens inside the actor loop.
pub struct SupervisorActor {
    config: SupervisorConfig,
    data: DataConfig,
    bus: EventBus,
    rx: mpsc::Receiver<SupervisorCommand>,
    changes: mpsc::Receiver<()>,
    internal_tx: mpsc::Sender<InternalEvent>,
    internal_rx: mpsc::Receiver<InternalEvent>,
    scrape_store: ScrapeStore,
    state: PipelineState,
    scraper: Option<RunningScraper>,
    stop_requested: bool,
    pending_rerun: bool,
    debounce_deadline: Option<Instant>,
}

impl SupervisorActor {
    /// Creates the actor plus its command handle. `changes` is the
    /// scrape-store change feed from the file watcher.
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        data: DataConfig,
        bus: EventBus,
        changes: mpsc::Receiver<()>,
    ) -> (Self, SupervisorHandle) {
        let (tx, rx) = mpsc::channel(32);
        let (internal_tx, internal_rx) = mpsc::channel(32);
        let scrape_store = ScrapeStore::new(data.posts_path());

        let actor = Self {
            config,
            data,
            bus,
            rx,
            changes,
            internal_tx,
            internal_rx,
            scrape_store,
            state: PipelineState::Idle,
            scraper: None,
            stop_requested: false,
            pending_rerun: false,
            debounce_deadline: None,
        };
        (actor, SupervisorHandle::new(tx))
    }

    /// Convenience wiring: spawns the actor onto the runtime and returns
    /// its handle.
    #[must_use]
    pub fn spawn(
        config: SupervisorConfig,
        data: DataConfig,
        bus: EventBus,
        changes: mpsc::Receiver<()>,
    ) -> SupervisorHandle {
        let (actor, handle) = Self::new(config, data, bus, changes);
        tokio::spawn(actor.run());
        handle
    }

    /// Runs the supervisor loop until shutdown.
    pub async fn run(mut self) {
        tracing::info!("supervisor starting");

        loop {
            let deadline = self.debounce_deadline;
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(()) = self.changes.recv() => self.on_store_change().await,
                Some(event) = self.internal_rx.recv() => self.on_internal(event).await,
                () = async { tokio::time::sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                    self.debounce_deadline = None;
                    self.on_debounce_elapsed().await;
                }
            }
        }

        if let Some(scraper) = self.scraper.take() {
            let _ = scraper.kill_tx.send(());
        }
        tracing::info!("supervisor stopped");
    }

    /// Returns `true` on shutdown.
    async fn handle_command(&mut self, cmd: SupervisorCommand) -> bool {
        match cmd {
            SupervisorCommand::StartScraper(reply) => {
                let _ = reply.send(self.start_scraper().await);
                false
            }
            SupervisorCommand::StopScraper(reply) => {
                let _ = reply.send(self.stop_scraper());
                false
            }
            SupervisorCommand::GetStatus(reply) => {
                let _ = reply.send(self.status());
                false
            }
            SupervisorCommand::Shutdown => {
                tracing::info!("supervisor shutting down");
                true
            }
        }
    }

    async fn start_scraper(&mut self) -> Result<u32, SupervisorError> {
        match self.state {
            PipelineState::Scraping => return Err(SupervisorError::AlreadyRunning),
            PipelineState::Processing => return Err(SupervisorError::Busy),
            PipelineState::Idle => {}
        }

        // A fresh run scrapes into a fresh document.
        if let Err(e) = self.scrape_store.clear().await {
            return Err(SupervisorError::Spawn(format!(
                "failed to reset scrape store: {e}"
            )));
        }

        let StageHandle {
            pid,
            kill_tx,
            exit_rx,
        } = spawn_stage(Stage::Scraper, &self.config, &self.data, &self.bus)?;

        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let code = exit_rx.await.unwrap_or(None);
            let _ = internal.send(InternalEvent::ScraperExited(code)).await;
        });

        self.scraper = Some(RunningScraper { pid, kill_tx });
        self.stop_requested = false;
        self.state = PipelineState::Scraping;
        self.debounce_deadline = None;
        Ok(pid)
    }

    fn stop_scraper(&mut self) -> Result<(), SupervisorError> {
        match self.state {
            PipelineState::Scraping => {
                self.stop_requested = true;
                if let Some(scraper) = self.scraper.take() {
                    let _ = scraper.kill_tx.send(());
                }
                Ok(())
            }
            // Processing runs to completion; stopping it is a no-op.
            PipelineState::Processing => Ok(()),
            PipelineState::Idle => Err(SupervisorError::NotRunning),
        }
    }

    fn status(&self) -> ScraperStatus {
        ScraperStatus {
            running: self.state == PipelineState::Scraping,
            pid: self.scraper.as_ref().map(|s| s.pid),
            state: self.state,
        }
    }

    async fn on_store_change(&mut self) {
        // Push fresh contents to subscribers on every observed change.
        match self.scrape_store.load().await {
            Ok(posts) => self.bus.publish(PipelineEvent::ScrapeUpdate { posts }),
            Err(e) => tracing::warn!("scrape store unreadable after change: {e}"),
        }

        match self.state {
            PipelineState::Idle => {
                // Quiesce before re-running; every further change resets the
                // window.
                self.debounce_deadline = Some(Instant::now() + self.debounce_window());
            }
            PipelineState::Processing => {
                self.pending_rerun = true;
            }
            // The scraper's own writes; the chain runs when it exits.
            PipelineState::Scraping => {}
        }
    }

    async fn on_debounce_elapsed(&mut self) {
        if self.state != PipelineState::Idle {
            return;
        }
        match self.scrape_store.load().await {
            Ok(posts) if posts.is_empty() => {
                // Emptied or deleted document: keep existing coin data.
                tracing::info!("scrape store empty after quiescence; nothing to process");
            }
            Ok(posts) => {
                tracing::info!(posts = posts.len(), "scrape store quiesced; processing");
                self.launch_processing();
            }
            Err(e) => {
                tracing::warn!("scrape store unreadable; skipping pipeline run: {e}");
            }
        }
    }

    fn launch_processing(&mut self) {
        self.state = PipelineState::Processing;
        let config = self.config.clone();
        let data = self.data.clone();
        let bus = self.bus.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = run_stages(&config, &data, &bus).await;
            let _ = internal
                .send(InternalEvent::ProcessingFinished(result))
                .await;
        });
    }

    async fn on_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::ScraperExited(code) => {
                self.scraper = None;
                self.bus
                    .publish(PipelineEvent::ScrapeStopped { exit_code: code });

                if self.state != PipelineState::Scraping {
                    return;
                }
                if code == Some(0) || self.stop_requested {
                    self.launch_processing();
                } else {
                    self.bus.publish(PipelineEvent::Error {
                        stage: Stage::Scraper,
                        message: format!("scraper exited with code {code:?}"),
                    });
                    self.state = PipelineState::Idle;
                }
                self.stop_requested = false;
            }
            InternalEvent::ProcessingFinished(result) => {
                self.state = PipelineState::Idle;
                match result {
                    Ok(count) => {
                        self.bus.publish(PipelineEvent::CoinsUpdated { count });
                    }
                    Err((stage, message)) => {
                        tracing::error!(stage = %stage, "processing failed: {message}");
                        self.bus.publish(PipelineEvent::Error { stage, message });
                    }
                }
                if self.pending_rerun {
                    self.pending_rerun = false;
                    tracing::info!("changes arrived mid-run; re-running once");
                    self.launch_processing();
                }
            }
        }
    }

    fn debounce_window(&self) -> Duration {
        Duration::from_secs_f64(self.config.debounce_secs.max(0.0))
    }
}

/// Aggregator then enricher, strictly sequential. A non-zero exit aborts
/// the rest of the chain.
async fn run_stages(
    config: &SupervisorConfig,
    data: &DataConfig,
    bus: &EventBus,
) -> Result<usize, (Stage, String)> {
    for stage in [Stage::Aggregator, Stage::Enricher] {
        let handle = spawn_stage(stage, config, data, bus).map_err(|e| (stage, e.to_string()))?;
        match handle.exit_rx.await {
            Ok(Some(0)) => {}
            Ok(code) => return Err((stage, format!("stage exited with code {code:?}"))),
            Err(_) => return Err((stage, "stage monitor vanished".to_string())),
        }
    }

    let count = CoinStore::new(data.coins_path())
        .load()
        .await
        .map(|coins| coins.len())
        .unwrap_or(0);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coinpulse_core::{BusEvent, EventStream, Post};
    use std::path::Path;

    const SLOW_SCRAPE: &str = r#"case "$0" in scrape) sleep 30 ;; *) exit 0 ;; esac"#;
    const ALL_FAST: &str = r#"exit 0"#;
    const FAILING_AGGREGATE: &str = r#"case "$0" in aggregate) exit 3 ;; *) exit 0 ;; esac"#;

    fn shell_override(script: &str) -> Option<Vec<String>> {
        Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            script.to_string(),
        ])
    }

    struct Rig {
        handle: SupervisorHandle,
        bus: EventBus,
        changes_tx: mpsc::Sender<()>,
        data: DataConfig,
        _dir: tempfile::TempDir,
    }

    fn rig(script: &str, debounce_secs: f64) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let data = DataConfig {
            dir: dir.path().to_path_buf(),
        };
        let config = SupervisorConfig {
            debounce_secs,
            stage_command_override: shell_override(script),
        };
        let bus = EventBus::new(256);
        let (changes_tx, changes_rx) = mpsc::channel(32);
        let handle = SupervisorActor::spawn(config, data.clone(), bus.clone(), changes_rx);
        Rig {
            handle,
            bus,
            changes_tx,
            data,
            _dir: dir,
        }
    }

    async fn seed_posts(dir: &Path) {
        let store = ScrapeStore::new(dir.join("scraped_posts.json"));
        let post = Post {
            id: 1,
            source: "CryptoMoonShots".to_string(),
            platform: "reddit".to_string(),
            title: "$PEP mooning".to_string(),
            content: String::new(),
            author: "u/test".to_string(),
            timestamp: Utc::now(),
            post_age: "1 hour ago".to_string(),
            upvotes: 10,
            comment_count: 0,
            comments: Vec::new(),
            link: "https://example.test/p/1".to_string(),
            token_symbol: Some("PEP".to_string()),
        };
        store.append(post).await.unwrap();
    }

    async fn next_matching<F>(stream: &mut EventStream, mut pred: F) -> BusEvent
    where
        F: FnMut(&PipelineEvent) -> bool,
    {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), stream.recv())
                .await
                .expect("timed out waiting for event")
                .expect("bus closed");
            if pred(&event.event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_scraping() {
        let rig = rig(SLOW_SCRAPE, 3.0);

        let pid = rig.handle.start_scraper().await.unwrap();
        assert!(pid > 0);

        let err = rig.handle.start_scraper().await.unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning));

        let status = rig.handle.status().await.unwrap();
        assert!(status.running);
        assert_eq!(status.pid, Some(pid));

        rig.handle.stop_scraper().await.unwrap();
    }

    #[tokio::test]
    async fn stop_when_idle_is_rejected() {
        let rig = rig(ALL_FAST, 3.0);
        let err = rig.handle.stop_scraper().await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning));
    }

    #[tokio::test]
    async fn start_clears_the_scrape_store() {
        let rig = rig(SLOW_SCRAPE, 3.0);
        seed_posts(&rig.data.dir).await;

        rig.handle.start_scraper().await.unwrap();

        let store = ScrapeStore::new(rig.data.posts_path());
        assert!(store.load().await.unwrap().is_empty());
        rig.handle.stop_scraper().await.unwrap();
    }

    #[tokio::test]
    async fn stop_mid_scrape_runs_processing_over_persisted_posts() {
        let rig = rig(SLOW_SCRAPE, 3.0);
        let mut stream = rig.bus.subscribe();

        rig.handle.start_scraper().await.unwrap();
        rig.handle.stop_scraper().await.unwrap();

        // scrapeStopped first, coinsUpdated after the chain completes.
        let mut saw_stopped = false;
        let updated = next_matching(&mut stream, |e| {
            if matches!(e, PipelineEvent::ScrapeStopped { .. }) {
                saw_stopped = true;
            }
            matches!(e, PipelineEvent::CoinsUpdated { .. })
        })
        .await;
        assert!(saw_stopped, "scrapeStopped must precede coinsUpdated");
        match updated.event {
            // Empty store (start cleared it): zero coins.
            PipelineEvent::CoinsUpdated { count } => assert_eq!(count, 0),
            other => panic!("unexpected event: {other:?}"),
        }

        let status = rig.handle.status().await.unwrap();
        assert!(!status.running);
    }

    #[tokio::test]
    async fn scraper_natural_exit_triggers_processing() {
        let rig = rig(ALL_FAST, 3.0);
        let mut stream = rig.bus.subscribe();

        rig.handle.start_scraper().await.unwrap();

        next_matching(&mut stream, |e| {
            matches!(e, PipelineEvent::ScrapeStopped { exit_code: Some(0) })
        })
        .await;
        next_matching(&mut stream, |e| matches!(e, PipelineEvent::CoinsUpdated { .. })).await;
    }

    #[tokio::test]
    async fn failing_stage_publishes_error_and_returns_to_idle() {
        let rig = rig(FAILING_AGGREGATE, 3.0);
        let mut stream = rig.bus.subscribe();

        rig.handle.start_scraper().await.unwrap();

        let error = next_matching(&mut stream, |e| matches!(e, PipelineEvent::Error { .. })).await;
        match error.event {
            PipelineEvent::Error { stage, .. } => assert_eq!(stage, Stage::Aggregator),
            other => panic!("unexpected event: {other:?}"),
        }

        // Back to idle: a new start is accepted.
        tokio::time::sleep(Duration::from_millis(100)).await;
        rig.handle.start_scraper().await.unwrap();
    }

    #[tokio::test]
    async fn burst_of_changes_debounces_to_one_processing_run() {
        let rig = rig(ALL_FAST, 0.5);
        seed_posts(&rig.data.dir).await;
        let mut stream = rig.bus.subscribe();

        // Five changes inside the window: one run, after quiescence.
        for _ in 0..5 {
            rig.changes_tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let burst_end = Instant::now();

        let updated =
            next_matching(&mut stream, |e| matches!(e, PipelineEvent::CoinsUpdated { .. })).await;
        drop(updated);
        assert!(
            burst_end.elapsed() >= Duration::from_millis(400),
            "processing must wait for the debounce window"
        );

        // No second run follows.
        let mut extra = 0;
        let deadline = tokio::time::sleep(Duration::from_secs(2));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                event = stream.recv() => {
                    if let Some(event) = event {
                        if matches!(event.event, PipelineEvent::CoinsUpdated { .. }) {
                            extra += 1;
                        }
                    }
                }
                () = &mut deadline => break,
            }
        }
        assert_eq!(extra, 0, "debounce burst must coalesce to a single run");
    }

    #[tokio::test]
    async fn empty_store_change_preserves_coin_data() {
        let rig = rig(ALL_FAST, 0.2);
        let mut stream = rig.bus.subscribe();

        // No posts on disk: the quiesced change must not launch processing.
        rig.changes_tx.send(()).await.unwrap();

        let mut saw_run = false;
        let deadline = tokio::time::sleep(Duration::from_secs(1));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                event = stream.recv() => {
                    if let Some(event) = event {
                        if matches!(event.event, PipelineEvent::CoinsUpdated { .. }) {
                            saw_run = true;
                        }
                    }
                }
                () = &mut deadline => break,
            }
        }
        assert!(!saw_run, "empty store must not trigger processing");
    }

    #[tokio::test]
    async fn change_during_processing_sets_pending_rerun() {
        // Slow aggregate keeps Processing alive long enough to observe.
        let script = r#"case "$0" in aggregate) sleep 1 ;; *) exit 0 ;; esac"#;
        let rig = rig(script, 0.2);
        seed_posts(&rig.data.dir).await;
        let mut stream = rig.bus.subscribe();

        rig.changes_tx.send(()).await.unwrap();
        // Wait out the debounce so processing starts, then change again.
        tokio::time::sleep(Duration::from_millis(500)).await;
        rig.changes_tx.send(()).await.unwrap();

        // Two coinsUpdated events: the original pass plus exactly one rerun.
        next_matching(&mut stream, |e| matches!(e, PipelineEvent::CoinsUpdated { .. })).await;
        next_matching(&mut stream, |e| matches!(e, PipelineEvent::CoinsUpdated { .. })).await;
    }

    #[tokio::test]
    async fn scrape_update_is_published_on_change() {
        let rig = rig(ALL_FAST, 5.0);
        seed_posts(&rig.data.dir).await;
        let mut stream = rig.bus.subscribe();

        rig.changes_tx.send(()).await.unwrap();

        let update =
            next_matching(&mut stream, |e| matches!(e, PipelineEvent::ScrapeUpdate { .. })).await;
        match update.event {
            PipelineEvent::ScrapeUpdate { posts } => {
                assert_eq!(posts.len(), 1);
                assert_eq!(posts[0].token_symbol.as_deref(), Some("PEP"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
