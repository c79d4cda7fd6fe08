use crate::provider::{check_status, MarketDataSource, ProviderError, ProviderKind};
use anyhow::Context;
use async_trait::async_trait;
use coinpulse_core::PartialMarketInfo;
use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;

const DEXSCREENER_API_URL: &str = "https://api.dexscreener.com";

/// DEX aggregator lookup: the head of the chain, and the usual source of
/// address, price, and 24h change.
pub struct DexScreenerProvider {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    pairs: Vec<Pair>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pair {
    chain_id: String,
    base_token: BaseToken,
    #[serde(default)]
    price_usd: Option<String>,
    #[serde(default)]
    price_change: Option<PriceChange>,
    #[serde(default)]
    info: Option<PairInfo>,
}

#[derive(Debug, Deserialize)]
struct BaseToken {
    address: String,
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct PriceChange {
    #[serde(default)]
    h24: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairInfo {
    #[serde(default)]
    image_url: Option<String>,
}

impl DexScreenerProvider {
    /// # Panics
    /// Panics if the rate limiter quota cannot be created.
    #[must_use]
    pub fn new() -> Self {
        // Documented limit is 300 requests/minute on the search endpoint.
        let quota = Quota::per_second(NonZeroU32::new(5).unwrap());
        Self {
            client: reqwest::Client::new(),
            base_url: DEXSCREENER_API_URL.to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for DexScreenerProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataSource for DexScreenerProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DexScreener
    }

    async fn lookup(&self, symbol: &str) -> Result<Option<PartialMarketInfo>, ProviderError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/latest/dex/search?q={symbol}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("dexscreener request failed")?;
        let response = check_status(response)?;
        let body: SearchResponse = response
            .json()
            .await
            .context("dexscreener response was not JSON")?;

        // Search is fuzzy; keep only pairs whose base token is the symbol,
        // preferring solana pairs the way the rest of the pipeline does.
        let pair = body
            .pairs
            .iter()
            .find(|p| p.base_token.symbol.eq_ignore_ascii_case(symbol) && p.chain_id == "solana")
            .or_else(|| {
                body.pairs
                    .iter()
                    .find(|p| p.base_token.symbol.eq_ignore_ascii_case(symbol))
            });

        let Some(pair) = pair else {
            return Ok(None);
        };

        Ok(Some(PartialMarketInfo {
            address: Some(pair.base_token.address.clone()),
            chain: Some(pair.chain_id.clone()),
            price_usd: pair.price_usd.as_deref().and_then(|p| p.parse().ok()),
            change_24h: pair.price_change.as_ref().and_then(|c| c.h24),
            logo_url: pair.info.as_ref().and_then(|i| i.image_url.clone()),
            decimals: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lookup_picks_solana_pair_for_symbol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/dex/search"))
            .and(query_param("q", "BONK"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pairs": [
                    {
                        "chainId": "ethereum",
                        "baseToken": {"address": "0xeth", "symbol": "BONK"},
                        "priceUsd": "0.00003",
                    },
                    {
                        "chainId": "solana",
                        "baseToken": {"address": "DezX...", "symbol": "BONK"},
                        "priceUsd": "0.00002",
                        "priceChange": {"h24": -3.2},
                        "info": {"imageUrl": "https://img.test/bonk.png"},
                    },
                ]
            })))
            .mount(&server)
            .await;

        let provider = DexScreenerProvider::new().with_base_url(server.uri());
        let info = provider.lookup("BONK").await.unwrap().unwrap();

        assert_eq!(info.address.as_deref(), Some("DezX..."));
        assert_eq!(info.chain.as_deref(), Some("solana"));
        assert_eq!(info.price_usd, Some(0.00002));
        assert_eq!(info.change_24h, Some(-3.2));
        assert_eq!(info.logo_url.as_deref(), Some("https://img.test/bonk.png"));
        assert_eq!(info.decimals, None);
    }

    #[tokio::test]
    async fn unknown_symbol_is_a_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/dex/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pairs": []})))
            .mount(&server)
            .await;

        let provider = DexScreenerProvider::new().with_base_url(server.uri());
        assert_eq!(provider.lookup("NOPE").await.unwrap(), None);
    }

    #[tokio::test]
    async fn status_429_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/dex/search"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = DexScreenerProvider::new().with_base_url(server.uri());
        let err = provider.lookup("BONK").await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited));
    }
}
