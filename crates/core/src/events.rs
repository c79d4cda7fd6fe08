use crate::types::Post;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the three pipeline stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Scraper,
    Aggregator,
    Enricher,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scraper => write!(f, "scraper"),
            Self::Aggregator => write!(f, "aggregator"),
            Self::Enricher => write!(f, "enricher"),
        }
    }
}

/// Typed events published on the [`crate::EventBus`].
///
/// Serialized with a `type` discriminant matching the wire names clients
/// subscribe to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PipelineEvent {
    /// Sent to a client immediately on subscribe.
    InitialSnapshot { posts: Vec<Post> },
    /// One line of incremental stage output.
    ScrapeLog { stage: Stage, line: String },
    /// Current scrape-store contents after a file change.
    ScrapeUpdate { posts: Vec<Post> },
    /// A per-source parsed log line.
    ThreadUpdate { source: String, line: String },
    /// The scraper stage terminated.
    ScrapeStopped { exit_code: Option<i32> },
    /// The enricher stage completed and the coin store is fresh.
    CoinsUpdated { count: usize },
    /// A fatal condition in `stage`.
    Error { stage: Stage, message: String },
    /// Synthesized for a subscriber whose buffer overflowed; replaces the
    /// dropped events.
    DroppedEvents { count: u64 },
}

/// A pipeline event stamped with its publish time. This is the wire shape:
/// `{type, timestamp, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    #[serde(flatten)]
    pub event: PipelineEvent,
    pub timestamp: DateTime<Utc>,
}

impl BusEvent {
    #[must_use]
    pub fn now(event: PipelineEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}
