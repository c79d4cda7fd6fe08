use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub enricher: EnricherConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Where the three pipeline documents live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
        }
    }
}

impl DataConfig {
    #[must_use]
    pub fn posts_path(&self) -> PathBuf {
        self.dir.join("scraped_posts.json")
    }

    #[must_use]
    pub fn sentiment_path(&self) -> PathBuf {
        self.dir.join("sentiment.json")
    }

    #[must_use]
    pub fn coins_path(&self) -> PathBuf {
        self.dir.join("coin-data.json")
    }
}

/// One scrape source: a listing page paired with a worker tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Short tag used in dedup keys and per-thread log lines, e.g. a
    /// subreddit name.
    pub tag: String,
    pub platform: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceSpec>,
    /// Posts older than this terminate their source early.
    #[serde(default = "default_max_post_age_days")]
    pub max_post_age_days: i64,
    /// Wall-clock budget per source.
    #[serde(default = "default_wall_budget_secs")]
    pub wall_budget_secs: u64,
    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,
    #[serde(default = "default_max_pages_per_source")]
    pub max_pages_per_source: u32,
    #[serde(default = "default_comments_per_post")]
    pub comments_per_post: usize,
    #[serde(default = "default_scrolls_per_page")]
    pub scrolls_per_page: u32,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            max_post_age_days: default_max_post_age_days(),
            wall_budget_secs: default_wall_budget_secs(),
            max_concurrent_sources: default_max_concurrent_sources(),
            max_pages_per_source: default_max_pages_per_source(),
            comments_per_post: default_comments_per_post(),
            scrolls_per_page: default_scrolls_per_page(),
        }
    }
}

fn default_sources() -> Vec<SourceSpec> {
    ["CryptoMoonShots", "SatoshiStreetBets", "memecoins"]
        .into_iter()
        .map(|tag| SourceSpec {
            tag: tag.to_string(),
            platform: "reddit".to_string(),
            url: format!("https://www.reddit.com/r/{tag}/new/"),
        })
        .collect()
}

const fn default_max_post_age_days() -> i64 {
    14
}

const fn default_wall_budget_secs() -> u64 {
    180
}

const fn default_max_concurrent_sources() -> usize {
    3
}

const fn default_max_pages_per_source() -> u32 {
    5
}

const fn default_comments_per_post() -> usize {
    10
}

const fn default_scrolls_per_page() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Completion endpoint of the symbol oracle. The API key comes from the
    /// `TOKEN_ORACLE_API_KEY` environment variable; without it the oracle is
    /// disabled and only the fast path runs.
    #[serde(default = "default_oracle_url")]
    pub oracle_url: String,
    #[serde(default = "default_oracle_model")]
    pub oracle_model: String,
    /// How many comments are joined into the oracle prompt.
    #[serde(default = "default_comment_context")]
    pub comment_context: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            oracle_url: default_oracle_url(),
            oracle_model: default_oracle_model(),
            comment_context: default_comment_context(),
        }
    }
}

fn default_oracle_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_oracle_model() -> String {
    "gpt-4o-mini".to_string()
}

const fn default_comment_context() -> usize {
    5
}

/// Weights for the confidence blend and the per-post weighting inside
/// aggregate sentiment. The blend defaults follow the scoring formula; they
/// are configurable rather than baked in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_raw_weight")]
    pub raw_weight: f64,
    #[serde(default = "default_aggregate_weight")]
    pub aggregate_weight: f64,
    #[serde(default = "default_engagement_weight")]
    pub engagement_weight: f64,
    /// Weight of comments relative to upvotes, both in the per-post
    /// log weight and in the engagement sum.
    #[serde(default = "default_comment_weight")]
    pub comment_weight: f64,
    /// Per-post constant in the engagement numerator.
    #[serde(default = "default_post_count_bonus")]
    pub post_count_bonus: f64,
    /// Engagement normalization reference.
    #[serde(default = "default_engagement_reference")]
    pub engagement_reference: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            raw_weight: default_raw_weight(),
            aggregate_weight: default_aggregate_weight(),
            engagement_weight: default_engagement_weight(),
            comment_weight: default_comment_weight(),
            post_count_bonus: default_post_count_bonus(),
            engagement_reference: default_engagement_reference(),
        }
    }
}

const fn default_raw_weight() -> f64 {
    0.3
}

const fn default_aggregate_weight() -> f64 {
    0.5
}

const fn default_engagement_weight() -> f64 {
    0.2
}

const fn default_comment_weight() -> f64 {
    0.5
}

const fn default_post_count_bonus() -> f64 {
    5.0
}

const fn default_engagement_reference() -> f64 {
    500.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnricherConfig {
    /// Symbols enriched concurrently.
    #[serde(default = "default_enricher_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long a rate-limited provider is skipped.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            parallelism: default_enricher_parallelism(),
            request_timeout_secs: default_request_timeout_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

const fn default_enricher_parallelism() -> usize {
    4
}

const fn default_request_timeout_secs() -> u64 {
    10
}

const fn default_cooldown_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Quiescence window after the last scrape-store change before the
    /// processing chain launches.
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: f64,
    /// Program + leading args to run stages with instead of the current
    /// executable. The stage subcommand name is appended. Used by tests.
    #[serde(default)]
    pub stage_command_override: Option<Vec<String>>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce_secs(),
            stage_command_override: None,
        }
    }
}

const fn default_debounce_secs() -> f64 {
    3.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Per-subscriber buffer; the oldest events are dropped for subscribers
    /// that fall further behind than this.
    #[serde(default = "default_event_buffer")]
    pub buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer: default_event_buffer(),
        }
    }
}

const fn default_event_buffer() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.scraper.max_post_age_days, 14);
        assert_eq!(config.scraper.wall_budget_secs, 180);
        assert_eq!(config.scraper.max_concurrent_sources, 3);
        assert_eq!(config.enricher.parallelism, 4);
        assert_eq!(config.enricher.cooldown_secs, 30);
        assert!((config.supervisor.debounce_secs - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn data_paths_use_configured_dir() {
        let data = DataConfig {
            dir: PathBuf::from("/tmp/pulse"),
        };
        assert_eq!(data.posts_path(), PathBuf::from("/tmp/pulse/scraped_posts.json"));
        assert_eq!(data.coins_path(), PathBuf::from("/tmp/pulse/coin-data.json"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"server": {"host": "127.0.0.1", "port": 9000}}"#).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.scraper.comments_per_post, 10);
        assert!(!config.scraper.sources.is_empty());
    }
}
