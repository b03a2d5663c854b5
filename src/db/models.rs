//! Ledger entities matching the PostgreSQL schema.
//!
//! Construction is always explicit: timestamps and default balances are set
//! by the caller at creation time, never by the storage layer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A user's trading account: one fiat balance plus zero or more holdings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: i64,
    pub user_id: i32,
    pub name: String,
    /// Fiat balance at monetary scale (4 digits). Never negative after a
    /// committed operation.
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Wallet {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            balance: row.try_get("balance")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// A wallet to insert. Balance and creation time are decided by the engine.
#[derive(Debug, Clone)]
pub struct NewWallet {
    pub user_id: i32,
    pub name: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Quantity of one asset held inside one wallet.
///
/// At most one row per (wallet, asset) pair. Quantity never goes negative; a
/// zero-quantity row may remain after selling out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub wallet_id: i64,
    pub asset_id: String,
    pub quantity: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Holding {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            wallet_id: row.try_get("wallet_id")?,
            asset_id: row.try_get("asset_id")?,
            quantity: row.try_get("quantity")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Reference data for a tradeable asset. Prices are maintained by the
/// background market-data refresher, never by the trade path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: Option<Decimal>,
    pub change_24h: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for Asset {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            name: row.try_get("name")?,
            current_price: row.try_get("current_price")?,
            change_24h: row.try_get("change_24h")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Direction of a settled trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    Buy,
    Sell,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Buy => "BUY",
            EntryKind::Sell => "SELL",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown entry kind: {0}")]
pub struct UnknownEntryKind(String);

impl FromStr for EntryKind {
    type Err = UnknownEntryKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(EntryKind::Buy),
            "SELL" => Ok(EntryKind::Sell),
            other => Err(UnknownEntryKind(other.to_string())),
        }
    }
}

/// One settled trade. Append-only: a row is written exactly once in the same
/// atomic unit as the wallet/holding mutation it records and is never
/// mutated or deleted afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: i32,
    pub wallet_id: i64,
    pub asset_id: String,
    pub kind: EntryKind,
    /// Quantity traded, at quantity scale (8 digits).
    pub quantity: Decimal,
    /// Unit price observed at execution, at monetary scale (4 digits).
    pub unit_price: Decimal,
    /// Exact recorded product quantity x unit_price at monetary scale.
    pub total_value: Decimal,
    pub executed_at: DateTime<Utc>,
    pub idempotency_key: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for LedgerEntry {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        let kind = kind.parse().map_err(|e: UnknownEntryKind| sqlx::Error::ColumnDecode {
            index: "kind".to_string(),
            source: Box::new(e),
        })?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            wallet_id: row.try_get("wallet_id")?,
            asset_id: row.try_get("asset_id")?,
            kind,
            quantity: row.try_get("quantity")?,
            unit_price: row.try_get("unit_price")?,
            total_value: row.try_get("total_value")?,
            executed_at: row.try_get("executed_at")?,
            idempotency_key: row.try_get("idempotency_key")?,
        })
    }
}
