use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single scraped social-media item.
///
/// `(source, link)` is the identity key: the scrape store never holds two
/// posts with the same pair. `comments` and `token_symbol` may be filled in
/// after the post is first created; once `token_symbol` is set the post is
/// never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: u64,
    pub source: String,
    pub platform: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub post_age: String,
    pub upvotes: u32,
    pub comment_count: u32,
    #[serde(default)]
    pub comments: Vec<String>,
    pub link: String,
    #[serde(default)]
    pub token_symbol: Option<String>,
}

impl Post {
    /// Dedup key shared with the scrape store's seen-set.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.source.clone(), self.link.clone())
    }
}

/// Trading recommendation derived from the confidence score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Buy,
    Hold,
    Sell,
}

impl Recommendation {
    /// Pure function of confidence: BUY at 75+, HOLD at 55..75, SELL below.
    #[must_use]
    pub const fn from_confidence(confidence: u8) -> Self {
        if confidence >= 75 {
            Self::Buy
        } else if confidence >= 55 {
            Self::Hold
        } else {
            Self::Sell
        }
    }
}

/// Per-symbol aggregation over the posts mentioning it.
///
/// Sentiment and engagement values are normalized to [0, 1] and rounded to
/// 4 decimal places before serialization so repeated runs over identical
/// inputs diff cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub symbol: String,
    pub posts: Vec<Post>,
    pub raw_sentiment: f64,
    pub aggregate_sentiment: f64,
    pub engagement: f64,
    pub confidence: u8,
    pub recommendation: Recommendation,
}

/// Any subset of on-chain market fields returned by one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartialMarketInfo {
    pub address: Option<String>,
    pub chain: Option<String>,
    pub price_usd: Option<f64>,
    pub change_24h: Option<f64>,
    pub logo_url: Option<String>,
    pub decimals: Option<u8>,
}

impl PartialMarketInfo {
    /// True when the provider yielded nothing at all (treated as a miss).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.address.is_none()
            && self.chain.is_none()
            && self.price_usd.is_none()
            && self.change_24h.is_none()
            && self.logo_url.is_none()
            && self.decimals.is_none()
    }

    /// Fields still unset after the merges so far.
    #[must_use]
    pub fn missing_fields(&self) -> bool {
        self.address.is_none()
            || self.chain.is_none()
            || self.price_usd.is_none()
            || self.change_24h.is_none()
            || self.logo_url.is_none()
            || self.decimals.is_none()
    }

    /// Fills fields this info is missing from `other`, field by field.
    /// Existing values always win, so calling in provider order implements
    /// earliest-provider-wins.
    pub fn fill_from(&mut self, other: PartialMarketInfo) {
        if self.address.is_none() {
            self.address = other.address;
        }
        if self.chain.is_none() {
            self.chain = other.chain;
        }
        if self.price_usd.is_none() {
            self.price_usd = other.price_usd;
        }
        if self.change_24h.is_none() {
            self.change_24h = other.change_24h;
        }
        if self.logo_url.is_none() {
            self.logo_url = other.logo_url;
        }
        if self.decimals.is_none() {
            self.decimals = other.decimals;
        }
    }
}

/// A token record enriched with whatever market data the provider chain
/// returned. One entry is emitted per token record even when every provider
/// missed; the optional fields then stay unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinEntry {
    pub symbol: String,
    pub posts: Vec<Post>,
    pub raw_sentiment: f64,
    pub aggregate_sentiment: f64,
    pub engagement: f64,
    pub confidence: u8,
    pub recommendation: Recommendation,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub price_usd: Option<f64>,
    #[serde(default)]
    pub change_24h: Option<f64>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
    pub latest_post: Post,
}

impl CoinEntry {
    /// Builds an entry from a token record plus the merged market info.
    ///
    /// `latest_post` is the post with the newest timestamp in the group.
    #[must_use]
    pub fn from_record(record: TokenRecord, market: PartialMarketInfo) -> Self {
        let latest_post = record
            .posts
            .iter()
            .max_by_key(|p| p.timestamp)
            .cloned()
            .unwrap_or_else(|| placeholder_post(&record.symbol));

        Self {
            symbol: record.symbol,
            posts: record.posts,
            raw_sentiment: record.raw_sentiment,
            aggregate_sentiment: record.aggregate_sentiment,
            engagement: record.engagement,
            confidence: record.confidence,
            recommendation: record.recommendation,
            address: market.address,
            chain: market.chain,
            price_usd: market.price_usd,
            change_24h: market.change_24h,
            logo_url: market.logo_url,
            decimals: market.decimals,
            latest_post,
        }
    }
}

// A token record always carries at least one post; this keeps the type
// total if a hand-edited store violates that.
fn placeholder_post(symbol: &str) -> Post {
    Post {
        id: 0,
        source: String::new(),
        platform: String::new(),
        title: symbol.to_string(),
        content: String::new(),
        author: String::new(),
        timestamp: DateTime::<Utc>::MIN_UTC,
        post_age: String::new(),
        upvotes: 0,
        comment_count: 0,
        comments: Vec::new(),
        link: String::new(),
        token_symbol: Some(symbol.to_string()),
    }
}

/// Rounds to 4 decimal places. Applied to sentiment and engagement values
/// before serialization for stable diffs across runs.
#[must_use]
pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
