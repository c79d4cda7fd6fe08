pub mod bus;
pub mod config;
pub mod config_loader;
pub mod events;
pub mod retry;
pub mod store_watcher;
pub mod traits;
pub mod types;

pub use bus::{EventBus, EventStream};
pub use config::{
    AggregatorConfig, AppConfig, DataConfig, EnricherConfig, EventsConfig, ResolverConfig,
    ScraperConfig, ServerConfig, SourceSpec, SupervisorConfig,
};
pub use config_loader::ConfigLoader;
pub use events::{BusEvent, PipelineEvent, Stage};
pub use retry::{cancellation_channel, cancelled, retry_with_backoff, Backoff};
pub use store_watcher::StoreWatcher;
pub use traits::{FetcherFactory, PageFetcher, SentimentScorer, SymbolOracle};
pub use types::{round4, CoinEntry, PartialMarketInfo, Post, Recommendation, TokenRecord};
