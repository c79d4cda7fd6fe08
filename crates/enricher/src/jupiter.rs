use crate::provider::{check_status, MarketDataSource, ProviderError, ProviderKind};
use anyhow::Context;
use async_trait::async_trait;
use coinpulse_core::PartialMarketInfo;
use serde::Deserialize;

const JUPITER_TOKEN_LIST_URL: &str = "https://token.jup.ag";

/// Jupiter strict token-list registry. Knows addresses, decimals, and
/// logos for vetted solana tokens; carries no prices.
pub struct JupiterListProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenEntry {
    address: String,
    symbol: String,
    #[serde(default)]
    decimals: Option<u8>,
    #[serde(default, rename = "logoURI")]
    logo_uri: Option<String>,
}

impl JupiterListProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: JUPITER_TOKEN_LIST_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for JupiterListProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataSource for JupiterListProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::JupiterList
    }

    async fn lookup(&self, symbol: &str) -> Result<Option<PartialMarketInfo>, ProviderError> {
        let url = format!("{}/strict", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("jupiter token list request failed")?;
        let response = check_status(response)?;
        let tokens: Vec<TokenEntry> = response
            .json()
            .await
            .context("jupiter token list was not JSON")?;

        let Some(token) = tokens
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
        else {
            return Ok(None);
        };

        Ok(Some(PartialMarketInfo {
            address: Some(token.address.clone()),
            chain: Some("solana".to_string()),
            price_usd: None,
            change_24h: None,
            logo_url: token.logo_uri.clone(),
            decimals: token.decimals,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lookup_matches_symbol_case_insensitively() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/strict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"address": "So11111", "symbol": "SOL", "decimals": 9, "logoURI": "https://img.test/sol.png"},
                {"address": "DezX...", "symbol": "Bonk", "decimals": 5, "logoURI": "https://img.test/bonk.png"},
            ])))
            .mount(&server)
            .await;

        let provider = JupiterListProvider::new().with_base_url(server.uri());
        let info = provider.lookup("BONK").await.unwrap().unwrap();

        assert_eq!(info.address.as_deref(), Some("DezX..."));
        assert_eq!(info.chain.as_deref(), Some("solana"));
        assert_eq!(info.decimals, Some(5));
        assert_eq!(info.logo_url.as_deref(), Some("https://img.test/bonk.png"));
        assert_eq!(info.price_usd, None);
    }

    #[tokio::test]
    async fn missing_token_is_a_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/strict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let provider = JupiterListProvider::new().with_base_url(server.uri());
        assert_eq!(provider.lookup("NOPE").await.unwrap(), None);
    }
}
