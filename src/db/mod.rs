//! PostgreSQL ledger store using SQLx.
//!
//! Runtime query checking (no compile-time DATABASE_URL needed). Settlement
//! atomicity comes from a transaction around guarded conditional updates:
//! the debit/credit only applies while the non-negativity invariant holds,
//! so concurrent settlements against the same wallet serialize on the row
//! and can never jointly overdraw. Wallets in different rows proceed in
//! parallel.

pub mod models;

pub use models::*;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Row};
use std::sync::Arc;
use tracing::info;

use crate::store::{LedgerStore, Page, PageRequest, Settlement, StoreError};

/// Database connection wrapper
#[derive(Clone)]
pub struct Database {
    pool: Arc<PgPool>,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        info!("Database pool created with max 10 connections");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const ENTRY_COLUMNS: &str = r#"
    id, user_id, wallet_id, asset_id, kind,
    quantity, unit_price, total_value, executed_at, idempotency_key
"#;

/// True when an insert failed on a unique index; in the ledger the only
/// unique constraint is the idempotency key.
fn is_idempotency_conflict(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation))
        .unwrap_or(false)
}

#[async_trait]
impl LedgerStore for Database {
    async fn user_exists(&self, user_id: i32) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }

    async fn create_wallet(&self, wallet: NewWallet) -> Result<Wallet, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO wallets (user_id, name, balance, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, name, balance, created_at
            "#,
        )
        .bind(wallet.user_id)
        .bind(&wallet.name)
        .bind(wallet.balance)
        .bind(wallet.created_at)
        .fetch_one(self.pool())
        .await?;

        Ok(Wallet::from_row(&row)?)
    }

    async fn rename_wallet(
        &self,
        wallet_id: i64,
        user_id: i32,
        name: &str,
    ) -> Result<Wallet, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE wallets
            SET name = $3
            WHERE id = $1 AND user_id = $2
            RETURNING id, user_id, name, balance, created_at
            "#,
        )
        .bind(wallet_id)
        .bind(user_id)
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Ok(Wallet::from_row(&row)?),
            None => Err(StoreError::WalletNotFound),
        }
    }

    async fn wallet_for_user(
        &self,
        wallet_id: i64,
        user_id: i32,
    ) -> Result<Option<Wallet>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, balance, created_at
            FROM wallets
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(wallet_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(Wallet::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn wallets_for_user(&self, user_id: i32) -> Result<Vec<Wallet>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, name, balance, created_at
            FROM wallets
            WHERE user_id = $1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        let mut wallets = Vec::new();
        for row in rows {
            wallets.push(Wallet::from_row(&row)?);
        }
        Ok(wallets)
    }

    async fn asset(&self, asset_id: &str) -> Result<Option<Asset>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, symbol, name, current_price, change_24h, updated_at
            FROM assets
            WHERE id = $1
            "#,
        )
        .bind(asset_id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(Asset::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_asset(&self, asset: Asset) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO assets (id, symbol, name, current_price, change_24h, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                symbol = EXCLUDED.symbol,
                name = EXCLUDED.name,
                current_price = EXCLUDED.current_price,
                change_24h = EXCLUDED.change_24h,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&asset.id)
        .bind(&asset.symbol)
        .bind(&asset.name)
        .bind(asset.current_price)
        .bind(asset.change_24h)
        .bind(asset.updated_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn asset_ids(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT id FROM assets ORDER BY id")
            .fetch_all(self.pool())
            .await?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.try_get("id")?);
        }
        Ok(ids)
    }

    async fn holding(
        &self,
        wallet_id: i64,
        asset_id: &str,
    ) -> Result<Option<Holding>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT wallet_id, asset_id, quantity, updated_at
            FROM holdings
            WHERE wallet_id = $1 AND asset_id = $2
            "#,
        )
        .bind(wallet_id)
        .bind(asset_id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(Holding::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn holdings_for_wallet(&self, wallet_id: i64) -> Result<Vec<Holding>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT wallet_id, asset_id, quantity, updated_at
            FROM holdings
            WHERE wallet_id = $1
            ORDER BY asset_id
            "#,
        )
        .bind(wallet_id)
        .fetch_all(self.pool())
        .await?;

        let mut holdings = Vec::new();
        for row in rows {
            holdings.push(Holding::from_row(&row)?);
        }
        Ok(holdings)
    }

    async fn settle(&self, settlement: Settlement) -> Result<LedgerEntry, StoreError> {
        let mut tx = self.pool().begin().await?;

        // A retried settlement with a known key returns the original entry
        // without touching any balance.
        if let Some(key) = settlement.idempotency_key {
            let existing = sqlx::query(&format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE idempotency_key = $1"
            ))
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = existing {
                return Ok(LedgerEntry::from_row(&row)?);
            }
        }

        match settlement.kind {
            EntryKind::Buy => {
                let debited = sqlx::query(
                    r#"
                    UPDATE wallets
                    SET balance = balance - $1
                    WHERE id = $2 AND user_id = $3 AND balance >= $1
                    "#,
                )
                .bind(settlement.total_value)
                .bind(settlement.wallet_id)
                .bind(settlement.user_id)
                .execute(&mut *tx)
                .await?;

                if debited.rows_affected() == 0 {
                    // Distinguish a missing wallet from an underfunded one.
                    let balance = sqlx::query(
                        "SELECT balance FROM wallets WHERE id = $1 AND user_id = $2",
                    )
                    .bind(settlement.wallet_id)
                    .bind(settlement.user_id)
                    .fetch_optional(&mut *tx)
                    .await?;

                    return match balance {
                        Some(row) => Err(StoreError::BalanceExhausted {
                            available: row.try_get("balance")?,
                        }),
                        None => Err(StoreError::WalletNotFound),
                    };
                }

                sqlx::query(
                    r#"
                    INSERT INTO holdings (wallet_id, asset_id, quantity, updated_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (wallet_id, asset_id) DO UPDATE SET
                        quantity = holdings.quantity + EXCLUDED.quantity,
                        updated_at = EXCLUDED.updated_at
                    "#,
                )
                .bind(settlement.wallet_id)
                .bind(&settlement.asset_id)
                .bind(settlement.quantity)
                .bind(settlement.executed_at)
                .execute(&mut *tx)
                .await?;
            }
            EntryKind::Sell => {
                // Wallet row first, matching the buy branch's lock order so
                // a concurrent buy and sell on one wallet cannot deadlock.
                // The credit rolls back with the transaction if the quantity
                // guard fails below.
                let credited = sqlx::query(
                    r#"
                    UPDATE wallets
                    SET balance = balance + $1
                    WHERE id = $2 AND user_id = $3
                    "#,
                )
                .bind(settlement.total_value)
                .bind(settlement.wallet_id)
                .bind(settlement.user_id)
                .execute(&mut *tx)
                .await?;

                if credited.rows_affected() == 0 {
                    return Err(StoreError::WalletNotFound);
                }

                let reduced = sqlx::query(
                    r#"
                    UPDATE holdings
                    SET quantity = quantity - $1, updated_at = $4
                    WHERE wallet_id = $2 AND asset_id = $3 AND quantity >= $1
                    "#,
                )
                .bind(settlement.quantity)
                .bind(settlement.wallet_id)
                .bind(&settlement.asset_id)
                .bind(settlement.executed_at)
                .execute(&mut *tx)
                .await?;

                if reduced.rows_affected() == 0 {
                    let held = sqlx::query(
                        "SELECT quantity FROM holdings WHERE wallet_id = $1 AND asset_id = $2",
                    )
                    .bind(settlement.wallet_id)
                    .bind(&settlement.asset_id)
                    .fetch_optional(&mut *tx)
                    .await?;

                    return match held {
                        Some(row) => Err(StoreError::QuantityExhausted {
                            held: row.try_get("quantity")?,
                        }),
                        None => Err(StoreError::HoldingNotFound),
                    };
                }
            }
        }

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO ledger_entries (
                user_id, wallet_id, asset_id, kind,
                quantity, unit_price, total_value, executed_at, idempotency_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(settlement.user_id)
        .bind(settlement.wallet_id)
        .bind(&settlement.asset_id)
        .bind(settlement.kind.as_str())
        .bind(settlement.quantity)
        .bind(settlement.unit_price)
        .bind(settlement.total_value)
        .bind(settlement.executed_at)
        .bind(settlement.idempotency_key)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(e) => {
                // A concurrent settlement with the same key committed after
                // our replay check and won the unique index. Drop our deltas
                // and return the entry it created.
                if let Some(key) = settlement.idempotency_key {
                    if is_idempotency_conflict(&e) {
                        tx.rollback().await?;
                        let existing = sqlx::query(&format!(
                            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE idempotency_key = $1"
                        ))
                        .bind(key)
                        .fetch_one(self.pool())
                        .await?;
                        return Ok(LedgerEntry::from_row(&existing)?);
                    }
                }
                return Err(e.into());
            }
        };

        let entry = LedgerEntry::from_row(&row)?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn entries_for_user(
        &self,
        user_id: i32,
        kind: Option<EntryKind>,
        page: PageRequest,
    ) -> Result<Page<LedgerEntry>, StoreError> {
        let kind = kind.map(|k| k.as_str());

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE user_id = $1 AND ($2::text IS NULL OR kind = $2)
            ORDER BY executed_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(user_id)
        .bind(kind)
        .bind(page.per_page)
        .bind(page.offset())
        .fetch_all(self.pool())
        .await?;

        let mut items = Vec::new();
        for row in rows {
            items.push(LedgerEntry::from_row(&row)?);
        }

        let total: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM ledger_entries
            WHERE user_id = $1 AND ($2::text IS NULL OR kind = $2)
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .fetch_one(self.pool())
        .await?;

        Ok(Page {
            items,
            page: page.page,
            per_page: page.per_page,
            total: total.0,
        })
    }
}
