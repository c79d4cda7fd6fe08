use crate::provider::{check_status, MarketDataSource, ProviderError, ProviderKind};
use anyhow::Context;
use async_trait::async_trait;
use coinpulse_core::PartialMarketInfo;
use serde::Deserialize;

const MORALIS_API_URL: &str = "https://deep-index.moralis.io";
const API_KEY_ENV: &str = "MORALIS_API_KEY";

/// Moralis token metadata API, the tail of the chain. Requires an API key;
/// without `MORALIS_API_KEY` the provider is left out of the chain
/// entirely.
pub struct MoralisProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<TokenResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResult {
    token_address: String,
    symbol: String,
    #[serde(default)]
    chain_id: Option<String>,
    #[serde(default)]
    usd_price: Option<f64>,
    #[serde(default)]
    usd_price_percent_change24h: Option<f64>,
    #[serde(default)]
    logo: Option<String>,
    #[serde(default)]
    decimals: Option<u8>,
}

impl MoralisProvider {
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: MORALIS_API_URL.to_string(),
            api_key,
        }
    }

    /// Builds the provider from the `MORALIS_API_KEY` environment variable.
    /// Returns `None` without it, which drops Moralis from the chain.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.is_empty() => Some(Self::new(key)),
            _ => {
                tracing::warn!("{API_KEY_ENV} not set; moralis provider disabled");
                None
            }
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl MarketDataSource for MoralisProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Moralis
    }

    async fn lookup(&self, symbol: &str) -> Result<Option<PartialMarketInfo>, ProviderError> {
        let url = format!(
            "{}/api/v2.2/tokens/search?query={symbol}&chains=solana",
            self.base_url
        );
        let response = self
            .client
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .context("moralis request failed")?;
        let response = check_status(response)?;
        let body: SearchResponse = response
            .json()
            .await
            .context("moralis response was not JSON")?;

        let Some(token) = body
            .result
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
        else {
            return Ok(None);
        };

        Ok(Some(PartialMarketInfo {
            address: Some(token.token_address.clone()),
            chain: token.chain_id.clone().or_else(|| Some("solana".to_string())),
            price_usd: token.usd_price,
            change_24h: token.usd_price_percent_change24h,
            logo_url: token.logo.clone(),
            decimals: token.decimals,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lookup_sends_api_key_and_parses_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2.2/tokens/search"))
            .and(header("X-API-Key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": [{
                    "tokenAddress": "DezX...",
                    "symbol": "BONK",
                    "chainId": "solana",
                    "usdPrice": 0.00002,
                    "usdPricePercentChange24h": 4.1,
                    "logo": "https://img.test/bonk.png",
                    "decimals": 5,
                }]
            })))
            .mount(&server)
            .await;

        let provider = MoralisProvider::new("secret".to_string()).with_base_url(server.uri());
        let info = provider.lookup("BONK").await.unwrap().unwrap();

        assert_eq!(info.address.as_deref(), Some("DezX..."));
        assert_eq!(info.price_usd, Some(0.00002));
        assert_eq!(info.decimals, Some(5));
    }

    #[tokio::test]
    async fn rate_limit_is_signalled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2.2/tokens/search"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = MoralisProvider::new("secret".to_string()).with_base_url(server.uri());
        assert!(matches!(
            provider.lookup("BONK").await.unwrap_err(),
            ProviderError::RateLimited
        ));
    }
}
