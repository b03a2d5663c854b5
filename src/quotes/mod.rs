//! Quote source contract.
//!
//! Supplies the current unit price of an asset in the settlement currency.
//! The trading engine treats it as a single lookup returning a positive
//! price or nothing; everything else (caching, refresh cadence, provider
//! quirks) lives behind the trait.

pub mod coingecko;

pub use coingecko::CoinGeckoQuotes;

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("quote request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected quote payload: {0}")]
    Payload(String),
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Current unit price for one asset, or `None` when the provider does
    /// not know it. Non-positive prices are never returned.
    async fn price(&self, asset_id: &str) -> Result<Option<Decimal>, QuoteError>;

    /// Bulk lookup; assets the provider does not know are absent from the map.
    async fn prices(&self, asset_ids: &[String]) -> Result<HashMap<String, Decimal>, QuoteError>;
}

/// Fixed in-process quote table, for tests and offline demos.
#[derive(Default)]
pub struct StaticQuotes {
    table: RwLock<HashMap<String, Decimal>>,
}

impl StaticQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, asset_id: &str, price: Decimal) {
        self.table.write().insert(asset_id.to_string(), price);
    }

    pub fn clear(&self, asset_id: &str) {
        self.table.write().remove(asset_id);
    }
}

#[async_trait]
impl QuoteSource for StaticQuotes {
    async fn price(&self, asset_id: &str) -> Result<Option<Decimal>, QuoteError> {
        Ok(self
            .table
            .read()
            .get(asset_id)
            .copied()
            .filter(|p| *p > Decimal::ZERO))
    }

    async fn prices(&self, asset_ids: &[String]) -> Result<HashMap<String, Decimal>, QuoteError> {
        let table = self.table.read();
        Ok(asset_ids
            .iter()
            .filter_map(|id| {
                table
                    .get(id)
                    .copied()
                    .filter(|p| *p > Decimal::ZERO)
                    .map(|p| (id.clone(), p))
            })
            .collect())
    }
}
