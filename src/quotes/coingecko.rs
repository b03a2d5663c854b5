//! CoinGecko market-data client.
//!
//! Uses the public `/coins/markets` endpoint with the configured settlement
//! currency. Single-asset lookups go through a short-lived last-known-price
//! cache so the trade path does not hit the provider on every call. The
//! background refresher feeds the same payload into the asset reference
//! table for valuation display data (symbol, name, 24h change).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::db::models::Asset;
use crate::money::round_money;
use crate::quotes::{QuoteError, QuoteSource};
use crate::store::LedgerStore;

const CACHE_TTL: Duration = Duration::from_secs(30);
const MAX_IDS_PER_REQUEST: usize = 250;

/// One row of the `/coins/markets` response.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketCoin {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
}

impl MarketCoin {
    /// Positive price at monetary scale, or `None` when the provider has no
    /// usable quote for this coin.
    pub fn usable_price(&self) -> Option<Decimal> {
        self.current_price
            .and_then(Decimal::from_f64)
            .map(round_money)
            .filter(|p| *p > Decimal::ZERO)
    }
}

struct CachedQuote {
    price: Decimal,
    fetched_at: Instant,
}

pub struct CoinGeckoQuotes {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    vs_currency: String,
    cache: DashMap<String, CachedQuote>,
}

impl CoinGeckoQuotes {
    pub fn new(base_url: String, api_key: Option<String>, vs_currency: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            vs_currency,
            cache: DashMap::new(),
        }
    }

    /// Fetch market rows for the given coin ids.
    pub async fn market_data(&self, ids: &[String]) -> Result<Vec<MarketCoin>, QuoteError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut coins = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_IDS_PER_REQUEST) {
            let url = format!(
                "{}/coins/markets?vs_currency={}&ids={}&order=market_cap_desc&per_page={}&page=1&sparkline=false",
                self.base_url,
                self.vs_currency,
                chunk.join(","),
                chunk.len(),
            );

            let mut request = self.client.get(&url).header("accept", "application/json");
            if let Some(ref key) = self.api_key {
                request = request.header("x-cg-demo-api-key", key);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(QuoteError::Payload(format!(
                    "status {} from {}",
                    response.status(),
                    url
                )));
            }

            let page: Vec<MarketCoin> = response.json().await?;
            coins.extend(page);
        }

        // Refresh the quote cache with whatever came back.
        let now = Instant::now();
        for coin in &coins {
            if let Some(price) = coin.usable_price() {
                self.cache.insert(
                    coin.id.clone(),
                    CachedQuote {
                        price,
                        fetched_at: now,
                    },
                );
            }
        }

        Ok(coins)
    }

    fn cached(&self, asset_id: &str) -> Option<Decimal> {
        self.cache
            .get(asset_id)
            .filter(|q| q.fetched_at.elapsed() < CACHE_TTL)
            .map(|q| q.price)
    }
}

#[async_trait]
impl QuoteSource for CoinGeckoQuotes {
    async fn price(&self, asset_id: &str) -> Result<Option<Decimal>, QuoteError> {
        if let Some(price) = self.cached(asset_id) {
            return Ok(Some(price));
        }

        let coins = self.market_data(&[asset_id.to_string()]).await?;
        Ok(coins
            .iter()
            .find(|c| c.id == asset_id)
            .and_then(MarketCoin::usable_price))
    }

    async fn prices(&self, asset_ids: &[String]) -> Result<HashMap<String, Decimal>, QuoteError> {
        let coins = self.market_data(asset_ids).await?;
        Ok(coins
            .into_iter()
            .filter_map(|c| c.usable_price().map(|p| (c.id, p)))
            .collect())
    }
}

/// Periodically pull market data for every known asset and write it back
/// into the asset reference table. Runs outside the trade path; failures are
/// logged and retried on the next tick.
pub fn spawn_price_refresher(
    store: Arc<dyn LedgerStore>,
    quotes: Arc<CoinGeckoQuotes>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let ids = match store.asset_ids().await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!("Price refresh skipped, could not list assets: {}", e);
                    continue;
                }
            };
            if ids.is_empty() {
                continue;
            }

            let coins = match quotes.market_data(&ids).await {
                Ok(coins) => coins,
                Err(e) => {
                    warn!("Price refresh failed: {}", e);
                    continue;
                }
            };

            let mut updated = 0usize;
            for coin in coins {
                let asset = Asset {
                    id: coin.id.clone(),
                    symbol: coin.symbol.to_uppercase(),
                    name: coin.name.clone(),
                    current_price: coin.usable_price(),
                    change_24h: coin.price_change_percentage_24h,
                    updated_at: Some(Utc::now()),
                };
                match store.upsert_asset(asset).await {
                    Ok(()) => updated += 1,
                    Err(e) => warn!("Failed to store refreshed asset {}: {}", coin.id, e),
                }
            }
            info!("Refreshed market data for {}/{} assets", updated, ids.len());
        }
    })
}
