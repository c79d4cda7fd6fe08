use async_trait::async_trait;
use coinpulse_core::PartialMarketInfo;
use serde::Serialize;

/// Identity tag for each provider in the chain, used for cool-down
/// bookkeeping and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    DexScreener,
    JupiterList,
    Moralis,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DexScreener => write!(f, "dexscreener"),
            Self::JupiterList => write!(f, "jupiter-list"),
            Self::Moralis => write!(f, "moralis"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider signalled a rate limit; the enricher puts it on
    /// cool-down rather than retrying.
    #[error("rate limited")]
    RateLimited,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// One external market-data API in the ordered fallback chain.
///
/// `lookup` returns whatever subset of the market fields the provider
/// knows; `Ok(None)` and an all-empty info are both treated as misses that
/// do not short-circuit the chain.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn lookup(&self, symbol: &str) -> Result<Option<PartialMarketInfo>, ProviderError>;
}

/// Maps an HTTP response into the provider error space: 429 becomes the
/// rate-limit signal, other error statuses stay transient.
pub(crate) fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited);
    }
    response
        .error_for_status()
        .map_err(|e| ProviderError::Other(e.into()))
}
