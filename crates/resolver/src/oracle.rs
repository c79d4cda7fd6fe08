use anyhow::{Context, Result};
use async_trait::async_trait;
use coinpulse_core::{ResolverConfig, SymbolOracle};

const API_KEY_ENV: &str = "TOKEN_ORACLE_API_KEY";

const SYSTEM_PROMPT: &str = "You identify which cryptocurrency token a social media post is about. \
Reply with the ticker symbol only, uppercase, no $ prefix. \
Reply NONE if the post is not about one specific token.";

/// Completion-API backed symbol oracle.
///
/// The external service rate-limits aggressively; the resolver serializes
/// calls to it, so this client carries no limiter of its own.
pub struct HttpSymbolOracle {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

impl HttpSymbolOracle {
    #[must_use]
    pub fn new(url: String, model: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url,
            model,
            api_key,
        }
    }

    /// Builds the oracle from config plus the `TOKEN_ORACLE_API_KEY`
    /// environment variable. Without the credential the oracle is disabled
    /// and `None` is returned; the resolver then runs its fast path only.
    #[must_use]
    pub fn from_env(config: &ResolverConfig) -> Option<Self> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.is_empty() => Some(Self::new(
                config.oracle_url.clone(),
                config.oracle_model.clone(),
                key,
            )),
            _ => {
                tracing::warn!("{API_KEY_ENV} not set; token oracle disabled");
                None
            }
        }
    }
}

#[async_trait]
impl SymbolOracle for HttpSymbolOracle {
    async fn identify(&self, prompt: &str) -> Result<Option<String>> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "max_tokens": 8,
            "temperature": 0,
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("oracle request failed")?
            .error_for_status()
            .context("oracle returned error status")?;

        let json: serde_json::Value = response
            .json()
            .await
            .context("oracle response was not JSON")?;

        let answer = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .trim_start_matches('$')
            .to_uppercase();

        Ok(normalize_symbol(&answer))
    }
}

/// Accepts only plausible tickers: 2-5 uppercase ASCII letters.
pub(crate) fn normalize_symbol(answer: &str) -> Option<String> {
    if answer == "NONE" {
        return None;
    }
    let len = answer.len();
    if (2..=5).contains(&len) && answer.bytes().all(|b| b.is_ascii_uppercase()) {
        Some(answer.to_string())
    } else {
        None
    }
}
