use crate::json_store::{JsonStore, StoreError};
use coinpulse_core::{CoinEntry, TokenRecord};
use std::path::PathBuf;

/// The per-token sentiment document. Replace-mode: each aggregator pass
/// rewrites it wholesale.
pub struct SentimentStore {
    inner: JsonStore<TokenRecord>,
}

impl SentimentStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            inner: JsonStore::new(path),
        }
    }

    /// # Errors
    /// Fails when the document stays unreadable through the retries.
    pub async fn load(&self) -> Result<Vec<TokenRecord>, StoreError> {
        self.inner.read().await
    }

    /// # Errors
    /// Fails if the commit fails.
    pub async fn replace(&self, records: &[TokenRecord]) -> Result<(), StoreError> {
        self.inner.replace(records).await
    }
}

/// The market-enriched coin document. Replace-mode.
pub struct CoinStore {
    inner: JsonStore<CoinEntry>,
}

impl CoinStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            inner: JsonStore::new(path),
        }
    }

    /// # Errors
    /// Fails when the document stays unreadable through the retries.
    pub async fn load(&self) -> Result<Vec<CoinEntry>, StoreError> {
        self.inner.read().await
    }

    /// # Errors
    /// Fails if the commit fails.
    pub async fn replace(&self, entries: &[CoinEntry]) -> Result<(), StoreError> {
        self.inner.replace(entries).await
    }
}
