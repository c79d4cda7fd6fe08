use crate::scripts;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use coinpulse_core::{cancelled, Backoff, PageFetcher, Post, ScraperConfig, SourceSpec};
use coinpulse_resolver::TokenResolver;
use coinpulse_store::{ScrapeStore, SeenSet};
use serde::Deserialize;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// Per-source scrape limits, lifted out of the scraper config.
#[derive(Debug, Clone)]
pub struct ScrapeLimits {
    pub max_post_age: ChronoDuration,
    pub wall_budget: std::time::Duration,
    pub max_pages_per_source: u32,
    pub comments_per_post: usize,
    pub scrolls_per_page: u32,
}

impl ScrapeLimits {
    #[must_use]
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            max_post_age: ChronoDuration::days(config.max_post_age_days),
            wall_budget: std::time::Duration::from_secs(config.wall_budget_secs),
            max_pages_per_source: config.max_pages_per_source,
            comments_per_post: config.comments_per_post,
            scrolls_per_page: config.scrolls_per_page,
        }
    }
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct SourceStats {
    pub posts_added: usize,
    pub duplicates_skipped: usize,
    pub posts_dropped: usize,
    pub pages: u32,
}

/// A candidate item extracted from a listing page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    author: String,
    link: String,
    created_utc: f64,
    #[serde(default)]
    upvotes: u32,
    #[serde(default)]
    num_comments: u32,
}

/// One scraping task: owns an isolated page fetcher and walks a single
/// source's listing until a stop condition fires.
pub struct SourceWorker {
    pub spec: SourceSpec,
    pub limits: ScrapeLimits,
    pub store: Arc<ScrapeStore>,
    pub seen: Arc<SeenSet>,
    pub ids: Arc<AtomicU64>,
    pub resolver: Arc<TokenResolver>,
    pub cancel: watch::Receiver<bool>,
}

impl SourceWorker {
    /// Runs the worker to completion. Stops on age cutoff, page limit, wall
    /// budget, exhausted listing, or cancellation.
    ///
    /// # Errors
    ///
    /// Returns an error when the listing itself is permanently unreachable;
    /// per-post failures are absorbed into the stats.
    pub async fn run(mut self, mut fetcher: Box<dyn PageFetcher>) -> Result<SourceStats> {
        let deadline = Instant::now() + self.limits.wall_budget;
        let cutoff = Utc::now() - self.limits.max_post_age;
        let mut stats = SourceStats::default();

        tracing::info!(source = %self.spec.tag, url = %self.spec.url, "source worker starting");

        let result = self
            .scrape_listing(&mut fetcher, deadline, cutoff, &mut stats)
            .await;

        if let Err(e) = fetcher.close().await {
            tracing::debug!(source = %self.spec.tag, "fetcher close failed: {e}");
        }

        match result {
            Ok(reason) => {
                tracing::info!(
                    source = %self.spec.tag,
                    posts = stats.posts_added,
                    duplicates = stats.duplicates_skipped,
                    pages = stats.pages,
                    "source worker finished: {reason}"
                );
                Ok(stats)
            }
            Err(e) => Err(e.context(format!("source {} failed", self.spec.tag))),
        }
    }

    async fn scrape_listing(
        &mut self,
        fetcher: &mut Box<dyn PageFetcher>,
        deadline: Instant,
        cutoff: DateTime<Utc>,
        stats: &mut SourceStats,
    ) -> Result<&'static str> {
        let listing_url = self.spec.url.clone();
        self.navigate_retry(fetcher, &listing_url).await?;

        loop {
            if *self.cancel.borrow() {
                return Ok("cancelled");
            }
            if Instant::now() >= deadline {
                return Ok("wall budget exhausted");
            }

            let value = self.evaluate_retry(fetcher, scripts::EXTRACT_POSTS).await?;
            let candidates: Vec<Candidate> =
                serde_json::from_value(value).context("listing extraction returned bad shape")?;

            if candidates.is_empty() {
                return Ok("listing exhausted");
            }

            let mut any_fresh = false;
            for candidate in candidates {
                if *self.cancel.borrow() {
                    return Ok("cancelled");
                }

                let timestamp = DateTime::from_timestamp(candidate.created_utc as i64, 0)
                    .unwrap_or_else(Utc::now);
                if timestamp < cutoff {
                    continue;
                }
                any_fresh = true;

                if !self.seen.insert(&self.spec.tag, &candidate.link) {
                    stats.duplicates_skipped += 1;
                    continue;
                }

                self.process_candidate(fetcher, candidate, timestamp, &listing_url, stats)
                    .await;
            }

            if !any_fresh {
                return Ok("all visible posts older than cutoff");
            }

            stats.pages += 1;
            if stats.pages >= self.limits.max_pages_per_source {
                return Ok("page limit reached");
            }

            if !self.scroll_for_more(fetcher, deadline).await? {
                return Ok("no more content");
            }
        }
    }

    async fn process_candidate(
        &mut self,
        fetcher: &mut Box<dyn PageFetcher>,
        candidate: Candidate,
        timestamp: DateTime<Utc>,
        listing_url: &str,
        stats: &mut SourceStats,
    ) {
        let mut post = Post {
            // The real id is drawn from the shared counter inside the store
            // lock, so ids land strictly increasing in append order.
            id: 0,
            source: self.spec.tag.clone(),
            platform: self.spec.platform.clone(),
            title: candidate.title,
            content: candidate.content,
            author: candidate.author,
            timestamp,
            post_age: humanize_age(timestamp, Utc::now()),
            upvotes: candidate.upvotes,
            comment_count: candidate.num_comments,
            comments: Vec::new(),
            link: candidate.link,
            token_symbol: None,
        };

        if post.comment_count > 0 && self.limits.comments_per_post > 0 {
            match self.collect_comments(fetcher, &post.link).await {
                Ok(mut comments) => {
                    comments.truncate(self.limits.comments_per_post);
                    post.comments = comments;
                }
                Err(e) => {
                    tracing::warn!(source = %self.spec.tag, link = %post.link, "comment collection failed: {e}");
                }
            }
            // Return to the listing before the next candidate.
            if let Err(e) = self.navigate_retry(fetcher, listing_url).await {
                tracing::warn!(source = %self.spec.tag, "listing re-navigation failed: {e}");
            }
        }

        match self.append_retry(post.clone()).await {
            Ok(Some(id)) => {
                stats.posts_added += 1;
                post.id = id;
                tracing::info!(
                    source = %self.spec.tag,
                    post_id = id,
                    title = %post.title,
                    "scraped post"
                );
                self.resolver.submit(post);
            }
            Ok(None) => {
                stats.duplicates_skipped += 1;
            }
            Err(e) => {
                stats.posts_dropped += 1;
                tracing::error!(source = %self.spec.tag, link = %post.link, "post dropped, append failed: {e}");
            }
        }
    }

    async fn collect_comments(
        &mut self,
        fetcher: &mut Box<dyn PageFetcher>,
        link: &str,
    ) -> Result<Vec<String>> {
        self.navigate_retry(fetcher, link).await?;
        let value = self
            .evaluate_retry(fetcher, scripts::EXTRACT_COMMENTS)
            .await?;
        serde_json::from_value(value).context("comment extraction returned bad shape")
    }

    async fn scroll_for_more(
        &mut self,
        fetcher: &mut Box<dyn PageFetcher>,
        deadline: Instant,
    ) -> Result<bool> {
        for _ in 0..self.limits.scrolls_per_page {
            if *self.cancel.borrow() || Instant::now() >= deadline {
                return Ok(false);
            }
            let value = self.evaluate_retry(fetcher, scripts::SCROLL_MORE).await?;
            if value.as_bool() == Some(true) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn navigate_retry(
        &mut self,
        fetcher: &mut Box<dyn PageFetcher>,
        url: &str,
    ) -> Result<()> {
        let policy = Backoff::default();
        let mut last_err = None;

        for attempt in 0..policy.max_attempts {
            if *self.cancel.borrow() {
                anyhow::bail!("navigate cancelled");
            }
            match fetcher.navigate(url).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        source = %self.spec.tag,
                        attempt = attempt + 1,
                        "navigate to {url} failed: {e}"
                    );
                    last_err = Some(e);
                }
            }
            if attempt + 1 < policy.max_attempts {
                self.backoff_sleep(policy.delay(attempt)).await?;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("navigate failed")))
    }

    async fn evaluate_retry(
        &mut self,
        fetcher: &mut Box<dyn PageFetcher>,
        script: &str,
    ) -> Result<serde_json::Value> {
        let policy = Backoff::default();
        let mut last_err = None;

        for attempt in 0..policy.max_attempts {
            if *self.cancel.borrow() {
                anyhow::bail!("evaluate cancelled");
            }
            match fetcher.evaluate(script).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        source = %self.spec.tag,
                        attempt = attempt + 1,
                        "evaluate failed: {e}"
                    );
                    last_err = Some(e);
                }
            }
            if attempt + 1 < policy.max_attempts {
                self.backoff_sleep(policy.delay(attempt)).await?;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("evaluate failed")))
    }

    async fn append_retry(&self, post: Post) -> Result<Option<u64>> {
        let policy = Backoff::default();
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..policy.max_attempts {
            match self.store.append_assigning_id(post.clone(), &self.ids).await {
                Ok(assigned) => return Ok(assigned),
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, "store append failed: {e}");
                    last_err = Some(e.into());
                }
            }
            if attempt + 1 < policy.max_attempts {
                tokio::time::sleep(policy.delay(attempt)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("store append failed")))
    }

    async fn backoff_sleep(&self, delay: std::time::Duration) -> Result<()> {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            () = cancelled(&mut cancel) => anyhow::bail!("cancelled during backoff"),
        }
    }
}

/// "5 minutes ago" style age string carried on each post.
#[must_use]
pub fn humanize_age(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(timestamp);
    if elapsed.num_days() >= 1 {
        let days = elapsed.num_days();
        format!("{days} day{} ago", if days == 1 { "" } else { "s" })
    } else if elapsed.num_hours() >= 1 {
        let hours = elapsed.num_hours();
        format!("{hours} hour{} ago", if hours == 1 { "" } else { "s" })
    } else if elapsed.num_minutes() >= 1 {
        let minutes = elapsed.num_minutes();
        format!("{minutes} minute{} ago", if minutes == 1 { "" } else { "s" })
    } else {
        "just now".to_string()
    }
}
