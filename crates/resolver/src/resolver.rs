use coinpulse_core::{retry_with_backoff, Backoff, Post, ResolverConfig, SymbolOracle};
use coinpulse_store::ScrapeStore;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{watch, Mutex, Notify, Semaphore};

fn ticker_regex() -> &'static Regex {
    static TICKER: OnceLock<Regex> = OnceLock::new();
    TICKER.get_or_init(|| Regex::new(r"\$([A-Z]{2,5})\b").expect("ticker regex"))
}

/// Serializing queue in front of the slow symbol oracle.
///
/// A cheap `$TICKER` pattern over the title answers most posts; everything
/// else waits in FIFO order for the single oracle slot. Results are
/// memoized by post id, and a resolved symbol is written back into the
/// scrape store in place.
pub struct TokenResolver {
    store: Arc<ScrapeStore>,
    oracle: Option<Arc<dyn SymbolOracle>>,
    gate: Semaphore,
    memo: Mutex<HashMap<u64, Option<String>>>,
    comment_context: usize,
    cancel: watch::Receiver<bool>,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl TokenResolver {
    #[must_use]
    pub fn new(
        store: Arc<ScrapeStore>,
        oracle: Option<Arc<dyn SymbolOracle>>,
        config: &ResolverConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        if oracle.is_none() {
            tracing::info!("token resolver running fast path only (no oracle)");
        }
        Self {
            store,
            oracle,
            gate: Semaphore::new(1),
            memo: Mutex::new(HashMap::new()),
            comment_context: config.comment_context,
            cancel,
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    /// Queues asynchronous identification for a freshly scraped post. The
    /// result, if any, is attached to the post via the store write-back.
    pub fn submit(self: &Arc<Self>, post: Post) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            resolver.resolve_and_attach(post).await;
            if resolver.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                resolver.drained.notify_waiters();
            }
        });
    }

    /// Waits until every submitted identification has finished, so a
    /// scrape pass does not exit with write-backs still in flight.
    pub async fn drain(&self) {
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
    }

    /// Resolves the token symbol a post is about, or `None` when neither
    /// the pattern pass nor the oracle can tell.
    pub async fn resolve(&self, post: &Post) -> Option<String> {
        if let Some(cached) = self.memo.lock().await.get(&post.id) {
            return cached.clone();
        }

        if let Some(symbol) = fast_path(&post.title) {
            self.memo.lock().await.insert(post.id, Some(symbol.clone()));
            return Some(symbol);
        }

        let oracle = self.oracle.as_ref()?;

        // Capacity 1: the oracle rate-limits aggressively, so calls queue
        // here in FIFO order.
        let _permit = self.gate.acquire().await.ok()?;

        let prompt = self.build_prompt(post);
        let answer = retry_with_backoff(Backoff::default(), &self.cancel, "oracle call", |_| {
            let oracle = Arc::clone(oracle);
            let prompt = prompt.clone();
            async move { oracle.identify(&prompt).await }
        })
        .await;

        match answer {
            Ok(symbol) => {
                // A definitive answer (including "no symbol") is memoized;
                // transport failure is not, so the post can be retried later.
                self.memo.lock().await.insert(post.id, symbol.clone());
                symbol
            }
            Err(e) => {
                tracing::warn!(post_id = post.id, "oracle gave no answer: {e}");
                None
            }
        }
    }

    /// Resolves and, on success, attaches the symbol to the owning post in
    /// the scrape store via read-modify-write.
    pub async fn resolve_and_attach(&self, post: Post) {
        if post.token_symbol.is_some() {
            return;
        }

        let Some(symbol) = self.resolve(&post).await else {
            return;
        };

        let attached = symbol.clone();
        match self
            .store
            .update_post(post.id, move |p| p.token_symbol = Some(attached))
            .await
        {
            Ok(true) => {
                tracing::debug!(post_id = post.id, symbol = %symbol, "symbol attached");
            }
            Ok(false) => {
                tracing::warn!(post_id = post.id, "post vanished before symbol write-back");
            }
            Err(e) => {
                tracing::error!(post_id = post.id, "symbol write-back failed: {e}");
            }
        }
    }

    fn build_prompt(&self, post: &Post) -> String {
        let comments = post
            .comments
            .iter()
            .take(self.comment_context)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Title: {}\nBody: {}\nComments:\n{}",
            post.title, post.content, comments
        )
    }
}

/// Fast path: exactly one distinct `$TICKER` match in the title.
fn fast_path(title: &str) -> Option<String> {
    let matches: HashSet<&str> = ticker_regex()
        .captures_iter(title)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect();

    if matches.len() == 1 {
        matches.into_iter().next().map(str::to_uppercase)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use coinpulse_core::cancellation_channel;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn post(id: u64, title: &str) -> Post {
        Post {
            id,
            source: "CryptoMoonShots".to_string(),
            platform: "reddit".to_string(),
            title: title.to_string(),
            content: "some body".to_string(),
            author: "u/test".to_string(),
            timestamp: Utc::now(),
            post_age: "1 hour ago".to_string(),
            upvotes: 3,
            comment_count: 1,
            comments: vec!["nice".to_string()],
            link: format!("https://reddit.com/p/{id}"),
            token_symbol: None,
        }
    }

    struct FixedOracle {
        answer: Option<String>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SymbolOracle for FixedOracle {
        async fn identify(&self, _prompt: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    struct FailingOracle;

    #[async_trait]
    impl SymbolOracle for FailingOracle {
        async fn identify(&self, _prompt: &str) -> Result<Option<String>> {
            anyhow::bail!("oracle down")
        }
    }

    fn resolver_with(
        dir: &tempfile::TempDir,
        oracle: Option<Arc<dyn SymbolOracle>>,
    ) -> (TokenResolver, Arc<ScrapeStore>) {
        let store = Arc::new(ScrapeStore::new(dir.path().join("scraped_posts.json")));
        let (_tx, cancel) = cancellation_channel();
        let resolver = TokenResolver::new(
            store.clone(),
            oracle,
            &coinpulse_core::ResolverConfig::default(),
            cancel,
        );
        (resolver, store)
    }

    #[test]
    fn fast_path_needs_exactly_one_distinct_match() {
        assert_eq!(fast_path("$PEP mooning"), Some("PEP".to_string()));
        assert_eq!(fast_path("$PEP vs $WIF fight"), None);
        assert_eq!(fast_path("$PEP and $PEP again"), Some("PEP".to_string()));
        assert_eq!(fast_path("no tickers here"), None);
        // Below the 2-char minimum and above the 5-char maximum.
        assert_eq!(fast_path("$P pump"), None);
        assert_eq!(fast_path("$TOOLONG pump"), None);
        // Lowercase is not a ticker.
        assert_eq!(fast_path("$pep mooning"), None);
    }

    #[tokio::test]
    async fn fast_path_skips_the_oracle() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(FixedOracle {
            answer: Some("XXX".to_string()),
            calls: AtomicU32::new(0),
        });
        let (resolver, _store) = resolver_with(&dir, Some(oracle.clone()));

        let symbol = resolver.resolve(&post(1, "$PEP mooning")).await;
        assert_eq!(symbol, Some("PEP".to_string()));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_path_answer_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(FixedOracle {
            answer: Some("BONK".to_string()),
            calls: AtomicU32::new(0),
        });
        let (resolver, _store) = resolver_with(&dir, Some(oracle.clone()));

        let p = post(9, "this dog coin is going places");
        assert_eq!(resolver.resolve(&p).await, Some("BONK".to_string()));
        assert_eq!(resolver.resolve(&p).await, Some("BONK".to_string()));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oracle_failure_leaves_post_symbolless() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, store) = resolver_with(&dir, Some(Arc::new(FailingOracle)));

        let p = post(4, "mystery coin");
        store.append(p.clone()).await.unwrap();
        resolver.resolve_and_attach(p).await;

        let posts = store.load().await.unwrap();
        assert_eq!(posts[0].token_symbol, None);
    }

    #[tokio::test]
    async fn no_oracle_means_fast_path_only() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, _store) = resolver_with(&dir, None);

        assert_eq!(resolver.resolve(&post(1, "$WIF wow")).await, Some("WIF".to_string()));
        assert_eq!(resolver.resolve(&post(2, "no ticker")).await, None);
    }

    #[tokio::test]
    async fn drain_waits_for_submitted_write_backs() {
        let dir = tempfile::tempdir().unwrap();
        let (resolver, store) = resolver_with(&dir, None);
        let resolver = Arc::new(resolver);

        let p = post(11, "$WIF to the moon");
        store.append(p.clone()).await.unwrap();
        resolver.submit(p);
        resolver.drain().await;

        let posts = store.load().await.unwrap();
        assert_eq!(posts[0].token_symbol.as_deref(), Some("WIF"));
    }

    #[tokio::test]
    async fn resolved_symbol_is_written_back_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(FixedOracle {
            answer: Some("BONK".to_string()),
            calls: AtomicU32::new(0),
        });
        let (resolver, store) = resolver_with(&dir, Some(oracle));

        let p = post(2, "dog coin chatter");
        store.append(p.clone()).await.unwrap();
        resolver.resolve_and_attach(p).await;

        let posts = store.load().await.unwrap();
        assert_eq!(posts[0].token_symbol.as_deref(), Some("BONK"));
    }
}
