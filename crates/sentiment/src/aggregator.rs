use anyhow::Result;
use coinpulse_core::{
    round4, AggregatorConfig, Post, Recommendation, SentimentScorer, TokenRecord,
};
use coinpulse_store::{ScrapeStore, SentimentStore};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Groups scraped posts by token symbol and derives the per-token scores.
///
/// Each pass recomputes every record from scratch and replaces the
/// sentiment document wholesale.
pub struct SentimentAggregator {
    scorer: Arc<dyn SentimentScorer>,
    config: AggregatorConfig,
}

impl SentimentAggregator {
    #[must_use]
    pub fn new(scorer: Arc<dyn SentimentScorer>, config: AggregatorConfig) -> Self {
        Self { scorer, config }
    }

    /// Pure aggregation pass over a set of posts. Posts without a token
    /// symbol are discarded; groups come out in symbol order.
    #[must_use]
    pub fn aggregate(&self, posts: &[Post]) -> Vec<TokenRecord> {
        let mut groups: BTreeMap<String, Vec<Post>> = BTreeMap::new();
        for post in posts {
            if let Some(symbol) = &post.token_symbol {
                groups.entry(symbol.clone()).or_default().push(post.clone());
            }
        }

        groups
            .into_iter()
            .map(|(symbol, group)| self.score_group(symbol, group))
            .collect()
    }

    fn score_group(&self, symbol: String, posts: Vec<Post>) -> TokenRecord {
        let raw = normalize_to_unit(mean(
            posts
                .iter()
                .map(|p| self.scorer.score(&format!("{} {}", p.title, p.content))),
        ));

        // Upvote- and comment-weighted score over the full post text,
        // comments included.
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        let mut plain_sum = 0.0;
        for post in &posts {
            let text = format!("{} {} {}", post.title, post.content, post.comments.join(" "));
            let score = self.scorer.score(&text);
            let weight = (1.0 + f64::from(post.upvotes)).ln()
                + self.config.comment_weight * (1.0 + f64::from(post.comment_count)).ln();
            weighted_sum += weight * score;
            weight_sum += weight;
            plain_sum += score;
        }
        // A group of zero-engagement posts has no weights to speak of;
        // fall back to the plain mean.
        let aggregate = normalize_to_unit(if weight_sum > 0.0 {
            weighted_sum / weight_sum
        } else {
            plain_sum / posts.len() as f64
        });

        let upvotes: f64 = posts.iter().map(|p| f64::from(p.upvotes)).sum();
        let comment_counts: f64 = posts.iter().map(|p| f64::from(p.comment_count)).sum();
        let engagement = f64::min(
            1.0,
            (upvotes
                + self.config.comment_weight * comment_counts
                + self.config.post_count_bonus * posts.len() as f64)
                / self.config.engagement_reference,
        );

        let raw = round4(raw);
        let aggregate = round4(aggregate);
        let engagement = round4(engagement);

        let blend = self.config.raw_weight * raw
            + self.config.aggregate_weight * aggregate
            + self.config.engagement_weight * engagement;
        let confidence = (100.0 * blend.clamp(0.0, 1.0)).round() as u8;

        TokenRecord {
            symbol,
            posts,
            raw_sentiment: raw,
            aggregate_sentiment: aggregate,
            engagement,
            confidence,
            recommendation: Recommendation::from_confidence(confidence),
        }
    }

    /// Full stage pass: read the scrape store, aggregate, replace the
    /// sentiment store. Returns the number of token records written.
    ///
    /// An unreadable scrape store leaves the previous sentiment document
    /// untouched.
    ///
    /// # Errors
    ///
    /// Fails only when the sentiment store cannot be written.
    pub async fn run(
        &self,
        scrape_store: &ScrapeStore,
        sentiment_store: &SentimentStore,
    ) -> Result<usize> {
        let posts = match scrape_store.load().await {
            Ok(posts) => posts,
            Err(e) => {
                tracing::error!("scrape store unreadable, keeping previous sentiment: {e}");
                return Ok(0);
            }
        };

        let records = self.aggregate(&posts);
        sentiment_store.replace(&records).await?;

        tracing::info!(
            posts = posts.len(),
            tokens = records.len(),
            "sentiment aggregation complete"
        );
        Ok(records.len())
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Maps a [-1, 1] score onto [0, 1].
fn normalize_to_unit(score: f64) -> f64 {
    (score + 1.0) / 2.0
}
