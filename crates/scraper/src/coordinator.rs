use crate::worker::{ScrapeLimits, SourceStats, SourceWorker};
use anyhow::Result;
use coinpulse_core::{FetcherFactory, ScraperConfig};
use coinpulse_resolver::TokenResolver;
use coinpulse_store::{ScrapeStore, SeenSet};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ScrapeStats {
    pub posts_added: usize,
    pub duplicates_skipped: usize,
    pub posts_dropped: usize,
    pub sources_completed: usize,
    pub sources_failed: usize,
}

impl ScrapeStats {
    fn absorb(&mut self, stats: &SourceStats) {
        self.posts_added += stats.posts_added;
        self.duplicates_skipped += stats.duplicates_skipped;
        self.posts_dropped += stats.posts_dropped;
    }
}

/// Fans one worker out per source with bounded parallelism, sharing the
/// dedup set, the id counter, and the scrape store across all of them.
pub struct ScrapeCoordinator {
    config: ScraperConfig,
    store: Arc<ScrapeStore>,
    resolver: Arc<TokenResolver>,
    factory: Arc<dyn FetcherFactory>,
    cancel: watch::Receiver<bool>,
}

impl ScrapeCoordinator {
    #[must_use]
    pub fn new(
        config: ScraperConfig,
        store: Arc<ScrapeStore>,
        resolver: Arc<TokenResolver>,
        factory: Arc<dyn FetcherFactory>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            store,
            resolver,
            factory,
            cancel,
        }
    }

    /// Runs every configured source to completion and returns the combined
    /// stats. A failing source never takes its siblings down.
    ///
    /// # Errors
    ///
    /// Returns an error only when the scrape store is unusable from the
    /// start; per-source failures are counted in the stats.
    pub async fn run(&self) -> Result<ScrapeStats> {
        let existing = match self.store.load().await {
            Ok(posts) => posts,
            Err(e) => {
                tracing::warn!("scrape store unreadable at startup, starting fresh: {e}");
                Vec::new()
            }
        };

        let seen = Arc::new(SeenSet::seeded_from(&existing));
        let ids = Arc::new(AtomicU64::new(
            existing.iter().map(|p| p.id).max().unwrap_or(0),
        ));
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_sources.max(1)));
        let limits = ScrapeLimits::from_config(&self.config);

        tracing::info!(
            sources = self.config.sources.len(),
            parallelism = self.config.max_concurrent_sources,
            seeded = seen.len(),
            "scrape run starting"
        );

        let mut handles = Vec::with_capacity(self.config.sources.len());
        for spec in self.config.sources.clone() {
            let worker = SourceWorker {
                spec,
                limits: limits.clone(),
                store: Arc::clone(&self.store),
                seen: Arc::clone(&seen),
                ids: Arc::clone(&ids),
                resolver: Arc::clone(&self.resolver),
                cancel: self.cancel.clone(),
            };
            let factory = Arc::clone(&self.factory);
            let semaphore = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| anyhow::anyhow!("scrape semaphore closed"))?;
                let fetcher = factory.create().await?;
                worker.run(fetcher).await
            }));
        }

        let mut stats = ScrapeStats::default();
        for handle in handles {
            match handle.await {
                Ok(Ok(source_stats)) => {
                    stats.absorb(&source_stats);
                    stats.sources_completed += 1;
                }
                Ok(Err(e)) => {
                    stats.sources_failed += 1;
                    tracing::error!("{e:#}");
                }
                Err(e) => {
                    stats.sources_failed += 1;
                    tracing::error!("source task panicked: {e}");
                }
            }
        }

        // Let queued symbol identifications finish their write-backs before
        // the run is reported complete.
        self.resolver.drain().await;

        tracing::info!(
            posts = stats.posts_added,
            duplicates = stats.duplicates_skipped,
            dropped = stats.posts_dropped,
            completed = stats.sources_completed,
            failed = stats.sources_failed,
            "scrape run finished"
        );

        Ok(stats)
    }
}
