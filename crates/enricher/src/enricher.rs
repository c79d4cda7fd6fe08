use crate::cooldown::CooldownTracker;
use crate::dexscreener::DexScreenerProvider;
use crate::jupiter::JupiterListProvider;
use crate::moralis::MoralisProvider;
use crate::provider::{MarketDataSource, ProviderError};
use anyhow::Result;
use coinpulse_core::{Backoff, CoinEntry, EnricherConfig, PartialMarketInfo};
use coinpulse_store::{CoinStore, SentimentStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

/// Attaches on-chain market data to every token record through an ordered
/// provider chain.
///
/// Providers are consulted in order, each only for the fields still
/// missing; total misses do not short-circuit. A rate-limited provider
/// goes on cool-down and is skipped until it elapses. Every record yields
/// a coin entry, enriched or not.
#[derive(Clone)]
pub struct MarketEnricher {
    providers: Arc<Vec<Box<dyn MarketDataSource>>>,
    cooldowns: Arc<CooldownTracker>,
    config: EnricherConfig,
    cancel: watch::Receiver<bool>,
}

impl MarketEnricher {
    #[must_use]
    pub fn new(
        providers: Vec<Box<dyn MarketDataSource>>,
        config: EnricherConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let cooldowns = Arc::new(CooldownTracker::new(Duration::from_secs(
            config.cooldown_secs,
        )));
        Self {
            providers: Arc::new(providers),
            cooldowns,
            config,
            cancel,
        }
    }

    /// The production chain: DexScreener, then the Jupiter token list, then
    /// Moralis when its credential is present.
    #[must_use]
    pub fn with_default_chain(config: EnricherConfig, cancel: watch::Receiver<bool>) -> Self {
        let mut providers: Vec<Box<dyn MarketDataSource>> = vec![
            Box::new(DexScreenerProvider::new()),
            Box::new(JupiterListProvider::new()),
        ];
        if let Some(moralis) = MoralisProvider::from_env() {
            providers.push(Box::new(moralis));
        }
        Self::new(providers, config, cancel)
    }

    /// Walks the chain for one symbol, merging field-by-field with the
    /// earliest provider winning.
    pub async fn enrich_symbol(&self, symbol: &str) -> PartialMarketInfo {
        let mut merged = PartialMarketInfo::default();

        for provider in self.providers.iter() {
            if !merged.missing_fields() {
                break;
            }
            let kind = provider.kind();
            if self.cooldowns.is_cooling(kind) {
                tracing::debug!(provider = %kind, symbol, "skipping provider on cool-down");
                continue;
            }

            match self.lookup_with_retry(provider.as_ref(), symbol).await {
                Ok(Some(info)) if !info.is_empty() => {
                    tracing::debug!(provider = %kind, symbol, "provider hit");
                    merged.fill_from(info);
                }
                Ok(_) => {
                    tracing::debug!(provider = %kind, symbol, "provider miss");
                }
                Err(e) => {
                    tracing::warn!(provider = %kind, symbol, "provider lookup failed: {e}");
                }
            }
        }

        merged
    }

    async fn lookup_with_retry(
        &self,
        provider: &dyn MarketDataSource,
        symbol: &str,
    ) -> Result<Option<PartialMarketInfo>> {
        let policy = Backoff::default();
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..policy.max_attempts {
            if *self.cancel.borrow() {
                anyhow::bail!("enrichment cancelled");
            }

            match tokio::time::timeout(timeout, provider.lookup(symbol)).await {
                Ok(Ok(info)) => return Ok(info),
                Ok(Err(ProviderError::RateLimited)) => {
                    // Cool down instead of hammering the provider further.
                    self.cooldowns.note_rate_limit(provider.kind());
                    anyhow::bail!("provider rate limited");
                }
                Ok(Err(ProviderError::Other(e))) => {
                    tracing::warn!(
                        provider = %provider.kind(),
                        attempt = attempt + 1,
                        "lookup failed: {e}"
                    );
                    last_err = Some(e);
                }
                Err(_) => {
                    tracing::warn!(
                        provider = %provider.kind(),
                        attempt = attempt + 1,
                        "lookup timed out after {}s",
                        timeout.as_secs()
                    );
                    last_err = Some(anyhow::anyhow!("lookup timed out"));
                }
            }

            if attempt + 1 < policy.max_attempts {
                tokio::time::sleep(policy.delay(attempt)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("lookup failed")))
    }

    /// Full stage pass: read the sentiment store, enrich every record with
    /// bounded parallelism, replace the coin store. Entry order follows
    /// record order, so identical inputs and provider answers serialize
    /// identically.
    ///
    /// An unreadable sentiment store leaves the previous coin document
    /// untouched.
    ///
    /// # Errors
    ///
    /// Fails only when the coin store cannot be written.
    pub async fn run(
        &self,
        sentiment_store: &SentimentStore,
        coin_store: &CoinStore,
    ) -> Result<usize> {
        let records = match sentiment_store.load().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("sentiment store unreadable, keeping previous coins: {e}");
                return Ok(0);
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut handles = Vec::with_capacity(records.len());

        for record in records {
            let enricher = self.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let market = enricher.enrich_symbol(&record.symbol).await;
                CoinEntry::from_record(record, market)
            }));
        }

        // Awaiting in spawn order keeps the output order deterministic.
        let mut entries = Vec::with_capacity(handles.len());
        for handle in handles {
            entries.push(handle.await?);
        }

        coin_store.replace(&entries).await?;
        tracing::info!(coins = entries.len(), "market enrichment complete");
        Ok(entries.len())
    }
}
