pub mod cooldown;
pub mod dexscreener;
pub mod enricher;
pub mod jupiter;
pub mod moralis;
pub mod provider;

pub use cooldown::CooldownTracker;
pub use dexscreener::DexScreenerProvider;
pub use enricher::MarketEnricher;
pub use jupiter::JupiterListProvider;
pub use moralis::MoralisProvider;
pub use provider::{MarketDataSource, ProviderError, ProviderKind};
