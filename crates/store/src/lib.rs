pub mod json_store;
pub mod scrape_store;
pub mod stores;

pub use json_store::{JsonStore, StoreError};
pub use scrape_store::{merge_post, ScrapeStore, SeenSet};
pub use stores::{CoinStore, SentimentStore};
