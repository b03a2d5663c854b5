//! Ledger store contract.
//!
//! The trading engine talks to durable state exclusively through
//! [`LedgerStore`]. Implementations must provide per-settlement atomicity:
//! the wallet delta, the holding delta and the ledger append either all
//! commit or none do, and the non-negativity guards are enforced inside the
//! same unit so that two concurrent settlements against the same wallet
//! cannot both pass a check on stale state.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::{Asset, EntryKind, Holding, LedgerEntry, NewWallet, Wallet};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("wallet not found")]
    WalletNotFound,
    #[error("holding not found")]
    HoldingNotFound,
    #[error("wallet balance exhausted: {available} available")]
    BalanceExhausted { available: Decimal },
    #[error("holding quantity exhausted: {held} held")]
    QuantityExhausted { held: Decimal },
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl StoreError {
    /// Faults that are safe to retry: the settlement is guaranteed not to
    /// have partially applied.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlx(sqlx::Error::PoolTimedOut) | StoreError::Sqlx(sqlx::Error::Io(_)) => {
                true
            }
            // Serialization failures and deadlock aborts (SQLSTATE 40001,
            // 40P01) roll the transaction back cleanly.
            StoreError::Sqlx(sqlx::Error::Database(e)) => {
                matches!(e.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }
}

/// The fully computed outcome of a validated buy or sell, ready to apply.
///
/// All arithmetic (scaling, rounding, total) has already been done by the
/// engine; the store only applies the deltas under its guards.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub user_id: i32,
    pub wallet_id: i64,
    pub asset_id: String,
    pub kind: EntryKind,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_value: Decimal,
    pub executed_at: DateTime<Utc>,
    /// When present, a second settlement carrying the same key returns the
    /// originally created entry instead of applying again.
    pub idempotency_key: Option<Uuid>,
}

/// Zero-based pagination request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: i64,
    pub per_page: i64,
}

impl PageRequest {
    pub fn new(page: i64, per_page: i64) -> Self {
        Self {
            page: page.max(0),
            per_page: per_page.clamp(1, 200),
        }
    }

    pub fn offset(&self) -> i64 {
        self.page * self.per_page
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn user_exists(&self, user_id: i32) -> Result<bool, StoreError>;

    async fn create_wallet(&self, wallet: NewWallet) -> Result<Wallet, StoreError>;

    /// Rename a wallet owned by the given user.
    async fn rename_wallet(
        &self,
        wallet_id: i64,
        user_id: i32,
        name: &str,
    ) -> Result<Wallet, StoreError>;

    /// Resolve a wallet only if it belongs to the given user.
    async fn wallet_for_user(
        &self,
        wallet_id: i64,
        user_id: i32,
    ) -> Result<Option<Wallet>, StoreError>;

    async fn wallets_for_user(&self, user_id: i32) -> Result<Vec<Wallet>, StoreError>;

    async fn asset(&self, asset_id: &str) -> Result<Option<Asset>, StoreError>;

    /// Insert or replace asset reference data (market-data refresh path).
    async fn upsert_asset(&self, asset: Asset) -> Result<(), StoreError>;

    /// Ids of all known assets, for the background price refresher.
    async fn asset_ids(&self) -> Result<Vec<String>, StoreError>;

    async fn holding(
        &self,
        wallet_id: i64,
        asset_id: &str,
    ) -> Result<Option<Holding>, StoreError>;

    async fn holdings_for_wallet(&self, wallet_id: i64) -> Result<Vec<Holding>, StoreError>;

    /// Atomically apply a settlement and append its ledger entry.
    ///
    /// Buy: debit `total_value` from the wallet (fails with
    /// [`StoreError::BalanceExhausted`] if the balance would go negative),
    /// then add `quantity` to the holding, creating it if absent.
    ///
    /// Sell: subtract `quantity` from the holding (fails with
    /// [`StoreError::QuantityExhausted`] if it would go negative,
    /// [`StoreError::HoldingNotFound`] if there is no row), then credit
    /// `total_value` to the wallet.
    ///
    /// On any failure nothing is applied.
    async fn settle(&self, settlement: Settlement) -> Result<LedgerEntry, StoreError>;

    /// A page of the user's ledger, newest first, optionally filtered by kind.
    async fn entries_for_user(
        &self,
        user_id: i32,
        kind: Option<EntryKind>,
        page: PageRequest,
    ) -> Result<Page<LedgerEntry>, StoreError>;
}
