use anyhow::Result;
use async_trait::async_trait;

/// Abstract page transport used by the scrape workers.
///
/// The production transport talks to Reddit's public JSON listing endpoints;
/// a headless-browser transport implements the same three calls. Workers own
/// the extraction scripts and only consume the JSON values `evaluate`
/// returns.
#[async_trait]
pub trait PageFetcher: Send {
    /// Loads the given URL, replacing any previously loaded page.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Runs an extraction script against the loaded page and returns its
    /// value.
    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value>;

    /// Releases the underlying page/session resources.
    async fn close(&mut self) -> Result<()>;
}

/// Creates one isolated [`PageFetcher`] per scrape worker.
#[async_trait]
pub trait FetcherFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn PageFetcher>>;
}

/// Pure sentiment scorer: maps text to a score in [-1, 1].
pub trait SentimentScorer: Send + Sync {
    fn score(&self, text: &str) -> f64;
}

/// Slow network-backed oracle that identifies a token symbol from post text.
///
/// Calls are serialized by the resolver; implementations do not need their
/// own rate limiting.
#[async_trait]
pub trait SymbolOracle: Send + Sync {
    /// Returns the uppercase ticker the text is about, or `None` when the
    /// oracle cannot tell.
    async fn identify(&self, prompt: &str) -> Result<Option<String>>;
}
