//! Trading Engine - wallet/holding ledger operations.
//!
//! `buy` and `sell` validate against current state, compute the settlement
//! at fixed decimal scales, then hand the fully computed deltas to the
//! store, which applies them as one atomic unit. `valuate` and `history`
//! are read-only projections over the same state plus current quotes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::models::{Asset, EntryKind, LedgerEntry, NewWallet, Wallet};
use crate::money::{round_display, round_money, round_quantity, trade_value};
use crate::quotes::QuoteSource;
use crate::store::{LedgerStore, Page, PageRequest, Settlement, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("quantity must be positive and greater than zero")]
    InvalidQuantity,
    #[error("{0} not found")]
    NotFound(String),
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },
    #[error("insufficient quantity: holding {held}, requested {requested}")]
    InsufficientQuantity { held: Decimal, requested: Decimal },
    #[error("no valid price available for asset {0}")]
    PriceUnavailable(String),
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Maps store faults on read paths, where the typed not-found variants are
/// never expected.
fn store_fault(e: StoreError) -> EngineError {
    if e.is_transient() {
        EngineError::Unavailable(e.to_string())
    } else {
        EngineError::Internal(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Balance a newly opened wallet starts with.
    pub starting_balance: Decimal,
    /// How long to wait for the quote source before failing transiently.
    pub quote_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            // 100000.0000 in the settlement currency
            starting_balance: Decimal::new(1_000_000_000, 4),
            quote_timeout: Duration::from_secs(3),
        }
    }
}

/// One asset line of a portfolio valuation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioItem {
    pub asset_id: String,
    pub symbol: String,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub value: Decimal,
    pub change_24h: Option<f64>,
}

/// Point-in-time valuation of one wallet. Purely derived, no mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioView {
    pub wallet_id: i64,
    pub wallet_name: String,
    pub fiat_balance: Decimal,
    pub items: Vec<PortfolioItem>,
    pub crypto_value: Decimal,
    pub total_value: Decimal,
}

/// A ledger entry joined with the asset's current display identifiers.
/// Symbol and name reflect the asset as it is named today; the recorded
/// quantity, price and total never change.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntryView {
    pub id: i64,
    pub wallet_id: i64,
    pub asset_id: String,
    pub asset_symbol: String,
    pub asset_name: String,
    pub kind: EntryKind,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_value: Decimal,
    pub executed_at: DateTime<Utc>,
}

pub struct TradingEngine {
    store: Arc<dyn LedgerStore>,
    quotes: Arc<dyn QuoteSource>,
    settings: EngineSettings,
}

impl TradingEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        quotes: Arc<dyn QuoteSource>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            quotes,
            settings,
        }
    }

    // ==========================================
    // Wallet lifecycle
    // ==========================================

    /// Open a wallet for a user with the configured starting balance.
    pub async fn open_wallet(&self, user_id: i32, name: &str) -> Result<Wallet, EngineError> {
        self.ensure_user(user_id).await?;

        let wallet = self
            .store
            .create_wallet(NewWallet {
                user_id,
                name: name.trim().to_string(),
                balance: self.settings.starting_balance,
                created_at: Utc::now(),
            })
            .await
            .map_err(store_fault)?;

        info!(
            "Opened wallet {} for user {} with balance {}",
            wallet.id, user_id, wallet.balance
        );
        Ok(wallet)
    }

    pub async fn rename_wallet(
        &self,
        user_id: i32,
        wallet_id: i64,
        name: &str,
    ) -> Result<Wallet, EngineError> {
        self.store
            .rename_wallet(wallet_id, user_id, name.trim())
            .await
            .map_err(|e| match e {
                StoreError::WalletNotFound => {
                    EngineError::NotFound(format!("wallet {wallet_id} for user {user_id}"))
                }
                other => store_fault(other),
            })
    }

    pub async fn wallets(&self, user_id: i32) -> Result<Vec<Wallet>, EngineError> {
        self.ensure_user(user_id).await?;
        self.store.wallets_for_user(user_id).await.map_err(store_fault)
    }

    // ==========================================
    // Trade settlement
    // ==========================================

    /// Buy `quantity` of an asset against the wallet's fiat balance.
    ///
    /// Quantity and price are normalized to their fixed scales, the cost is
    /// rounded half-up once, and the debit, holding increment and ledger
    /// append commit atomically or not at all. Passing the same idempotency
    /// key again returns the originally created entry.
    pub async fn buy(
        &self,
        user_id: i32,
        wallet_id: i64,
        asset_id: &str,
        quantity: Decimal,
        idempotency_key: Option<Uuid>,
    ) -> Result<LedgerEntry, EngineError> {
        let quantity = validated_quantity(quantity)?;
        let wallet = self.wallet(user_id, wallet_id).await?;
        let asset = self.asset(asset_id).await?;

        let unit_price = self.trade_price(&asset.id).await?;
        let total_value = trade_value(quantity, unit_price);

        if wallet.balance < total_value {
            return Err(EngineError::InsufficientFunds {
                available: wallet.balance,
                required: total_value,
            });
        }

        let entry = self
            .settle(Settlement {
                user_id,
                wallet_id,
                asset_id: asset.id.clone(),
                kind: EntryKind::Buy,
                quantity,
                unit_price,
                total_value,
                executed_at: Utc::now(),
                idempotency_key,
            })
            .await?;

        info!(
            "BUY settled: user={} wallet={} asset={} qty={} price={} total={}",
            user_id, wallet_id, asset.id, quantity, unit_price, total_value
        );
        Ok(entry)
    }

    /// Sell `quantity` of a held asset back into the wallet's fiat balance.
    pub async fn sell(
        &self,
        user_id: i32,
        wallet_id: i64,
        asset_id: &str,
        quantity: Decimal,
        idempotency_key: Option<Uuid>,
    ) -> Result<LedgerEntry, EngineError> {
        let quantity = validated_quantity(quantity)?;
        let wallet = self.wallet(user_id, wallet_id).await?;
        let asset = self.asset(asset_id).await?;

        let holding = self
            .store
            .holding(wallet.id, &asset.id)
            .await
            .map_err(store_fault)?
            .ok_or_else(|| {
                EngineError::NotFound(format!("holding of {} in wallet {}", asset.name, wallet.id))
            })?;

        if holding.quantity < quantity {
            return Err(EngineError::InsufficientQuantity {
                held: holding.quantity,
                requested: quantity,
            });
        }

        let unit_price = self.trade_price(&asset.id).await?;
        let total_value = trade_value(quantity, unit_price);

        let entry = self
            .settle(Settlement {
                user_id,
                wallet_id,
                asset_id: asset.id.clone(),
                kind: EntryKind::Sell,
                quantity,
                unit_price,
                total_value,
                executed_at: Utc::now(),
                idempotency_key,
            })
            .await?;

        info!(
            "SELL settled: user={} wallet={} asset={} qty={} price={} total={}",
            user_id, wallet_id, asset.id, quantity, unit_price, total_value
        );
        Ok(entry)
    }

    async fn settle(&self, settlement: Settlement) -> Result<LedgerEntry, EngineError> {
        let requested = settlement.quantity;
        let required = settlement.total_value;
        let wallet_id = settlement.wallet_id;
        let asset_id = settlement.asset_id.clone();

        self.store.settle(settlement).await.map_err(|e| match e {
            // The guarded update lost a race that the pre-check passed.
            StoreError::BalanceExhausted { available } => EngineError::InsufficientFunds {
                available,
                required,
            },
            StoreError::QuantityExhausted { held } => EngineError::InsufficientQuantity {
                held,
                requested,
            },
            StoreError::WalletNotFound => EngineError::NotFound(format!("wallet {wallet_id}")),
            StoreError::HoldingNotFound => {
                EngineError::NotFound(format!("holding of {asset_id} in wallet {wallet_id}"))
            }
            other => store_fault(other),
        })
    }

    // ==========================================
    // Read-only projections
    // ==========================================

    /// Value a wallet from its holdings and current quotes.
    ///
    /// An asset without a usable quote is valued at zero rather than
    /// failing the whole view; the trade path is stricter.
    pub async fn valuate(
        &self,
        user_id: i32,
        wallet_id: i64,
    ) -> Result<PortfolioView, EngineError> {
        let wallet = self.wallet(user_id, wallet_id).await?;
        let holdings = self
            .store
            .holdings_for_wallet(wallet.id)
            .await
            .map_err(store_fault)?;

        let mut items = Vec::new();
        let mut crypto_value = Decimal::ZERO;

        for holding in holdings {
            if holding.quantity <= Decimal::ZERO {
                continue;
            }
            let Some(asset) = self
                .store
                .asset(&holding.asset_id)
                .await
                .map_err(store_fault)?
            else {
                warn!(
                    "Holding references unknown asset {}, valuing at zero",
                    holding.asset_id
                );
                continue;
            };

            let unit_price = self.display_price(&asset.id).await;
            let value = round_display(holding.quantity * unit_price);

            items.push(PortfolioItem {
                asset_id: asset.id,
                symbol: asset.symbol,
                name: asset.name,
                quantity: holding.quantity,
                unit_price,
                value,
                change_24h: asset.change_24h,
            });
            crypto_value += value;
        }

        let fiat_balance = round_display(wallet.balance);
        let crypto_value = round_display(crypto_value);
        Ok(PortfolioView {
            wallet_id: wallet.id,
            wallet_name: wallet.name,
            fiat_balance,
            items,
            crypto_value,
            total_value: fiat_balance + crypto_value,
        })
    }

    /// A page of the user's trade history, newest first, with asset display
    /// identifiers resolved at render time.
    pub async fn history(
        &self,
        user_id: i32,
        kind: Option<EntryKind>,
        page: PageRequest,
    ) -> Result<Page<LedgerEntryView>, EngineError> {
        self.ensure_user(user_id).await?;

        let entries = self
            .store
            .entries_for_user(user_id, kind, page)
            .await
            .map_err(store_fault)?;

        let mut assets: HashMap<String, Option<Asset>> = HashMap::new();
        for entry in &entries.items {
            if !assets.contains_key(&entry.asset_id) {
                let asset = self
                    .store
                    .asset(&entry.asset_id)
                    .await
                    .map_err(store_fault)?;
                assets.insert(entry.asset_id.clone(), asset);
            }
        }

        Ok(entries.map(|entry| {
            let asset = assets.get(&entry.asset_id).and_then(|a| a.as_ref());
            LedgerEntryView {
                id: entry.id,
                wallet_id: entry.wallet_id,
                asset_symbol: asset
                    .map(|a| a.symbol.clone())
                    .unwrap_or_else(|| entry.asset_id.clone()),
                asset_name: asset
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| entry.asset_id.clone()),
                asset_id: entry.asset_id,
                kind: entry.kind,
                quantity: entry.quantity,
                unit_price: entry.unit_price,
                total_value: entry.total_value,
                executed_at: entry.executed_at,
            }
        }))
    }

    // ==========================================
    // Per-user aggregates
    // ==========================================

    /// Total fiat balance across all of the user's wallets.
    ///
    /// Sums each wallet's balance at display scale, the exact `fiat_balance`
    /// figure [`Self::valuate`] reports, so the total always equals the
    /// per-wallet views summed. Errors propagate; a failure is never
    /// reported as a zero balance.
    pub async fn fiat_total(&self, user_id: i32) -> Result<Decimal, EngineError> {
        self.ensure_user(user_id).await?;
        let wallets = self
            .store
            .wallets_for_user(user_id)
            .await
            .map_err(store_fault)?;
        Ok(wallets
            .iter()
            .map(|w| round_display(w.balance))
            .sum::<Decimal>())
    }

    /// Total crypto value across all of the user's wallets.
    ///
    /// Computed through the same valuation path as [`Self::valuate`], so it
    /// reconciles exactly with the per-wallet views summed.
    pub async fn crypto_value_total(&self, user_id: i32) -> Result<Decimal, EngineError> {
        self.ensure_user(user_id).await?;
        let wallets = self
            .store
            .wallets_for_user(user_id)
            .await
            .map_err(store_fault)?;

        let mut total = Decimal::ZERO;
        for wallet in wallets {
            total += self.valuate(user_id, wallet.id).await?.crypto_value;
        }
        Ok(round_display(total))
    }

    // ==========================================
    // Lookups
    // ==========================================

    async fn ensure_user(&self, user_id: i32) -> Result<(), EngineError> {
        if self
            .store
            .user_exists(user_id)
            .await
            .map_err(store_fault)?
        {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("user {user_id}")))
        }
    }

    async fn wallet(&self, user_id: i32, wallet_id: i64) -> Result<Wallet, EngineError> {
        self.store
            .wallet_for_user(wallet_id, user_id)
            .await
            .map_err(store_fault)?
            .ok_or_else(|| EngineError::NotFound(format!("wallet {wallet_id} for user {user_id}")))
    }

    async fn asset(&self, asset_id: &str) -> Result<Asset, EngineError> {
        self.store
            .asset(asset_id)
            .await
            .map_err(store_fault)?
            .ok_or_else(|| EngineError::NotFound(format!("asset {asset_id}")))
    }

    /// Price for the trade path: must be present and positive. The value
    /// observed here is used for the whole operation; it is not re-checked
    /// at commit.
    async fn trade_price(&self, asset_id: &str) -> Result<Decimal, EngineError> {
        let lookup = tokio::time::timeout(self.settings.quote_timeout, self.quotes.price(asset_id))
            .await
            .map_err(|_| {
                EngineError::Unavailable(format!("quote lookup for {asset_id} timed out"))
            })?;

        match lookup.map_err(|e| EngineError::Unavailable(e.to_string()))? {
            Some(price) if price > Decimal::ZERO => Ok(round_money(price)),
            _ => {
                warn!("No valid price for asset {}, rejecting trade", asset_id);
                Err(EngineError::PriceUnavailable(asset_id.to_string()))
            }
        }
    }

    /// Price for valuation: degrades to zero instead of failing on stale or
    /// missing quotes.
    async fn display_price(&self, asset_id: &str) -> Decimal {
        let lookup =
            tokio::time::timeout(self.settings.quote_timeout, self.quotes.price(asset_id)).await;
        match lookup {
            Ok(Ok(Some(price))) if price > Decimal::ZERO => round_money(price),
            Ok(Ok(_)) => Decimal::ZERO,
            Ok(Err(e)) => {
                warn!("Quote lookup failed for {}: {}, valuing at zero", asset_id, e);
                Decimal::ZERO
            }
            Err(_) => {
                warn!("Quote lookup timed out for {}, valuing at zero", asset_id);
                Decimal::ZERO
            }
        }
    }
}

fn validated_quantity(quantity: Decimal) -> Result<Decimal, EngineError> {
    if quantity <= Decimal::ZERO {
        return Err(EngineError::InvalidQuantity);
    }
    Ok(round_quantity(quantity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::StaticQuotes;
    use crate::store::memory::MemoryStore;
    use rust_decimal_macros::dec;

    struct Fixture {
        engine: TradingEngine,
        store: Arc<MemoryStore>,
        quotes: Arc<StaticQuotes>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let quotes = Arc::new(StaticQuotes::new());
        store.add_user(1);
        store
            .upsert_asset(Asset {
                id: "bitcoin".to_string(),
                symbol: "BTC".to_string(),
                name: "Bitcoin".to_string(),
                current_price: Some(dec!(50000.0000)),
                change_24h: Some(2.5),
                updated_at: Some(Utc::now()),
            })
            .await
            .unwrap();
        let engine = TradingEngine::new(
            store.clone() as Arc<dyn LedgerStore>,
            quotes.clone() as Arc<dyn QuoteSource>,
            EngineSettings::default(),
        );
        Fixture {
            engine,
            store,
            quotes,
        }
    }

    async fn open_default_wallet(fix: &Fixture) -> Wallet {
        fix.engine.open_wallet(1, "Main").await.unwrap()
    }

    #[tokio::test]
    async fn test_open_wallet_uses_starting_balance() {
        let fix = fixture().await;
        let wallet = open_default_wallet(&fix).await;
        assert_eq!(wallet.balance, dec!(100000.0000));
        assert_eq!(wallet.user_id, 1);
    }

    #[tokio::test]
    async fn test_open_wallet_for_unknown_user_is_not_found() {
        let fix = fixture().await;
        let err = fix.engine.open_wallet(99, "Ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_buy_rejects_non_positive_quantity() {
        let fix = fixture().await;
        let wallet = open_default_wallet(&fix).await;

        for qty in [Decimal::ZERO, dec!(-0.5)] {
            let err = fix
                .engine
                .buy(1, wallet.id, "bitcoin", qty, None)
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::InvalidQuantity));
        }
    }

    #[tokio::test]
    async fn test_buy_unknown_wallet_or_asset_is_not_found() {
        let fix = fixture().await;
        let wallet = open_default_wallet(&fix).await;
        fix.quotes.set("bitcoin", dec!(50000));

        let err = fix
            .engine
            .buy(1, 999, "bitcoin", dec!(0.1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let err = fix
            .engine
            .buy(1, wallet.id, "dogecoin", dec!(0.1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_buy_without_quote_is_price_unavailable() {
        let fix = fixture().await;
        let wallet = open_default_wallet(&fix).await;

        let err = fix
            .engine
            .buy(1, wallet.id, "bitcoin", dec!(0.1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PriceUnavailable(_)));

        // Nothing moved.
        let after = fix.store.wallet_for_user(wallet.id, 1).await.unwrap().unwrap();
        assert_eq!(after.balance, dec!(100000.0000));
    }

    #[tokio::test]
    async fn test_buy_debits_cost_and_credits_holding() {
        let fix = fixture().await;
        let wallet = open_default_wallet(&fix).await;
        fix.quotes.set("bitcoin", dec!(50000.0000));

        let entry = fix
            .engine
            .buy(1, wallet.id, "bitcoin", dec!(0.5), None)
            .await
            .unwrap();

        assert_eq!(entry.kind, EntryKind::Buy);
        assert_eq!(entry.quantity, dec!(0.50000000));
        assert_eq!(entry.unit_price, dec!(50000.0000));
        assert_eq!(entry.total_value, dec!(25000.0000));
        assert_eq!(entry.total_value, entry.quantity * entry.unit_price);

        let after = fix.store.wallet_for_user(wallet.id, 1).await.unwrap().unwrap();
        assert_eq!(after.balance, dec!(75000.0000));
        let holding = fix.store.holding(wallet.id, "bitcoin").await.unwrap().unwrap();
        assert_eq!(holding.quantity, dec!(0.50000000));
    }

    #[tokio::test]
    async fn test_buy_beyond_balance_is_rejected_without_mutation() {
        let fix = fixture().await;
        let wallet = open_default_wallet(&fix).await;
        fix.quotes.set("bitcoin", dec!(50000.0000));

        let err = fix
            .engine
            .buy(1, wallet.id, "bitcoin", dec!(2.1), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientFunds { available, required }
                if available == dec!(100000.0000) && required == dec!(105000.0000)
        ));

        let after = fix.store.wallet_for_user(wallet.id, 1).await.unwrap().unwrap();
        assert_eq!(after.balance, dec!(100000.0000));
        assert!(fix.store.holding(wallet.id, "bitcoin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sell_without_holding_is_not_found() {
        let fix = fixture().await;
        let wallet = open_default_wallet(&fix).await;
        fix.quotes.set("bitcoin", dec!(50000.0000));

        let err = fix
            .engine
            .sell(1, wallet.id, "bitcoin", dec!(0.1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_quantity_is_normalized_to_eight_digits() {
        let fix = fixture().await;
        let wallet = open_default_wallet(&fix).await;
        fix.quotes.set("bitcoin", dec!(10000.0000));

        // Ninth fractional digit rounds half-up into the eighth.
        let entry = fix
            .engine
            .buy(1, wallet.id, "bitcoin", dec!(0.123456785), None)
            .await
            .unwrap();
        assert_eq!(entry.quantity, dec!(0.12345679));
    }

    #[tokio::test]
    async fn test_idempotency_key_prevents_double_charge() {
        let fix = fixture().await;
        let wallet = open_default_wallet(&fix).await;
        fix.quotes.set("bitcoin", dec!(50000.0000));

        let key = Uuid::new_v4();
        let first = fix
            .engine
            .buy(1, wallet.id, "bitcoin", dec!(0.1), Some(key))
            .await
            .unwrap();
        let retried = fix
            .engine
            .buy(1, wallet.id, "bitcoin", dec!(0.1), Some(key))
            .await
            .unwrap();

        assert_eq!(first, retried);
        let after = fix.store.wallet_for_user(wallet.id, 1).await.unwrap().unwrap();
        assert_eq!(after.balance, dec!(95000.0000));
    }

    #[tokio::test]
    async fn test_valuate_degrades_missing_quote_to_zero() {
        let fix = fixture().await;
        let wallet = open_default_wallet(&fix).await;
        fix.quotes.set("bitcoin", dec!(50000.0000));
        fix.engine
            .buy(1, wallet.id, "bitcoin", dec!(0.5), None)
            .await
            .unwrap();

        // Quote disappears: valuation degrades, it does not error.
        fix.quotes.clear("bitcoin");
        let view = fix.engine.valuate(1, wallet.id).await.unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].unit_price, Decimal::ZERO);
        assert_eq!(view.items[0].value, Decimal::ZERO);
        assert_eq!(view.crypto_value, Decimal::ZERO);
        assert_eq!(view.total_value, dec!(75000.00));
    }

    #[tokio::test]
    async fn test_valuate_is_idempotent() {
        let fix = fixture().await;
        let wallet = open_default_wallet(&fix).await;
        fix.quotes.set("bitcoin", dec!(50000.0000));
        fix.engine
            .buy(1, wallet.id, "bitcoin", dec!(0.5), None)
            .await
            .unwrap();

        let first = fix.engine.valuate(1, wallet.id).await.unwrap();
        let second = fix.engine.valuate(1, wallet.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fiat_balance, dec!(75000.00));
        assert_eq!(first.crypto_value, dec!(25000.00));
        assert_eq!(first.total_value, dec!(100000.00));
    }

    #[tokio::test]
    async fn test_history_filters_by_kind_and_renders_current_names() {
        let fix = fixture().await;
        let wallet = open_default_wallet(&fix).await;
        fix.quotes.set("bitcoin", dec!(50000.0000));

        fix.engine
            .buy(1, wallet.id, "bitcoin", dec!(0.5), None)
            .await
            .unwrap();
        fix.engine
            .sell(1, wallet.id, "bitcoin", dec!(0.2), None)
            .await
            .unwrap();

        // Asset gets renamed upstream; history shows the new identifiers.
        fix.store
            .upsert_asset(Asset {
                id: "bitcoin".to_string(),
                symbol: "XBT".to_string(),
                name: "Bitcoin Core".to_string(),
                current_price: Some(dec!(50000.0000)),
                change_24h: None,
                updated_at: Some(Utc::now()),
            })
            .await
            .unwrap();

        let all = fix
            .engine
            .history(1, None, PageRequest::new(0, 10))
            .await
            .unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.items[0].kind, EntryKind::Sell);
        assert_eq!(all.items[0].asset_symbol, "XBT");
        assert_eq!(all.items[0].asset_name, "Bitcoin Core");
        // Recorded numbers are untouched by the rename.
        assert_eq!(all.items[1].total_value, dec!(25000.0000));

        let buys = fix
            .engine
            .history(1, Some(EntryKind::Buy), PageRequest::new(0, 10))
            .await
            .unwrap();
        assert_eq!(buys.total, 1);
        assert_eq!(buys.items[0].kind, EntryKind::Buy);
    }

    #[tokio::test]
    async fn test_history_for_unknown_user_is_not_found() {
        let fix = fixture().await;
        let err = fix
            .engine
            .history(42, None, PageRequest::new(0, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fiat_total_matches_rounded_per_wallet_balances() {
        let store = Arc::new(MemoryStore::new());
        let quotes = Arc::new(StaticQuotes::new());
        store.add_user(1);
        let engine = TradingEngine::new(
            store as Arc<dyn LedgerStore>,
            quotes as Arc<dyn QuoteSource>,
            EngineSettings {
                // Balances below one cent round up per wallet; summing raw
                // balances first would lose half the total.
                starting_balance: dec!(0.0050),
                ..EngineSettings::default()
            },
        );
        let first = engine.open_wallet(1, "A").await.unwrap();
        let second = engine.open_wallet(1, "B").await.unwrap();

        let fiat_total = engine.fiat_total(1).await.unwrap();
        let v1 = engine.valuate(1, first.id).await.unwrap();
        let v2 = engine.valuate(1, second.id).await.unwrap();
        assert_eq!(v1.fiat_balance, dec!(0.01));
        assert_eq!(fiat_total, v1.fiat_balance + v2.fiat_balance);
        assert_eq!(fiat_total, dec!(0.02));
    }

    #[tokio::test]
    async fn test_user_totals_reconcile_with_per_wallet_valuations() {
        let fix = fixture().await;
        let first = fix.engine.open_wallet(1, "Main").await.unwrap();
        let second = fix.engine.open_wallet(1, "Side").await.unwrap();
        fix.quotes.set("bitcoin", dec!(40000.0000));

        fix.engine
            .buy(1, first.id, "bitcoin", dec!(0.25), None)
            .await
            .unwrap();
        fix.engine
            .buy(1, second.id, "bitcoin", dec!(1.0), None)
            .await
            .unwrap();

        let fiat_total = fix.engine.fiat_total(1).await.unwrap();
        let crypto_total = fix.engine.crypto_value_total(1).await.unwrap();

        let v1 = fix.engine.valuate(1, first.id).await.unwrap();
        let v2 = fix.engine.valuate(1, second.id).await.unwrap();
        assert_eq!(fiat_total, v1.fiat_balance + v2.fiat_balance);
        assert_eq!(crypto_total, v1.crypto_value + v2.crypto_value);
        assert_eq!(crypto_total, dec!(50000.00));
    }
}
