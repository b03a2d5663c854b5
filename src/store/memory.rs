//! In-memory ledger store.
//!
//! Backs the test suite and local demos. A single `RwLock` over the whole
//! state gives the same all-or-nothing settlement semantics the Postgres
//! store gets from transactions and guarded updates.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::models::{Asset, EntryKind, Holding, LedgerEntry, NewWallet, Wallet};
use crate::store::{LedgerStore, Page, PageRequest, Settlement, StoreError};

#[derive(Default)]
struct MemoryState {
    users: Vec<i32>,
    wallets: HashMap<i64, Wallet>,
    assets: HashMap<String, Asset>,
    holdings: HashMap<(i64, String), Holding>,
    entries: Vec<LedgerEntry>,
    entries_by_key: HashMap<Uuid, i64>,
    next_wallet_id: i64,
    next_entry_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user id. Identity itself is owned by an external system;
    /// the store only needs to know the id exists.
    pub fn add_user(&self, user_id: i32) {
        let mut state = self.inner.write();
        if !state.users.contains(&user_id) {
            state.users.push(user_id);
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn user_exists(&self, user_id: i32) -> Result<bool, StoreError> {
        Ok(self.inner.read().users.contains(&user_id))
    }

    async fn create_wallet(&self, wallet: NewWallet) -> Result<Wallet, StoreError> {
        let mut state = self.inner.write();
        state.next_wallet_id += 1;
        let id = state.next_wallet_id;
        let wallet = Wallet {
            id,
            user_id: wallet.user_id,
            name: wallet.name,
            balance: wallet.balance,
            created_at: wallet.created_at,
        };
        state.wallets.insert(id, wallet.clone());
        Ok(wallet)
    }

    async fn rename_wallet(
        &self,
        wallet_id: i64,
        user_id: i32,
        name: &str,
    ) -> Result<Wallet, StoreError> {
        let mut state = self.inner.write();
        let wallet = state
            .wallets
            .get_mut(&wallet_id)
            .filter(|w| w.user_id == user_id)
            .ok_or(StoreError::WalletNotFound)?;
        wallet.name = name.to_string();
        Ok(wallet.clone())
    }

    async fn wallet_for_user(
        &self,
        wallet_id: i64,
        user_id: i32,
    ) -> Result<Option<Wallet>, StoreError> {
        Ok(self
            .inner
            .read()
            .wallets
            .get(&wallet_id)
            .filter(|w| w.user_id == user_id)
            .cloned())
    }

    async fn wallets_for_user(&self, user_id: i32) -> Result<Vec<Wallet>, StoreError> {
        let state = self.inner.read();
        let mut wallets: Vec<Wallet> = state
            .wallets
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        wallets.sort_by_key(|w| w.id);
        Ok(wallets)
    }

    async fn asset(&self, asset_id: &str) -> Result<Option<Asset>, StoreError> {
        Ok(self.inner.read().assets.get(asset_id).cloned())
    }

    async fn upsert_asset(&self, asset: Asset) -> Result<(), StoreError> {
        self.inner.write().assets.insert(asset.id.clone(), asset);
        Ok(())
    }

    async fn asset_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.inner.read().assets.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn holding(
        &self,
        wallet_id: i64,
        asset_id: &str,
    ) -> Result<Option<Holding>, StoreError> {
        Ok(self
            .inner
            .read()
            .holdings
            .get(&(wallet_id, asset_id.to_string()))
            .cloned())
    }

    async fn holdings_for_wallet(&self, wallet_id: i64) -> Result<Vec<Holding>, StoreError> {
        let state = self.inner.read();
        let mut holdings: Vec<Holding> = state
            .holdings
            .values()
            .filter(|h| h.wallet_id == wallet_id)
            .cloned()
            .collect();
        holdings.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
        Ok(holdings)
    }

    async fn settle(&self, settlement: Settlement) -> Result<LedgerEntry, StoreError> {
        let mut guard = self.inner.write();
        let state = &mut *guard;

        // Replay: the entry was already created under this key.
        if let Some(entry) = settlement
            .idempotency_key
            .and_then(|key| state.entries_by_key.get(&key))
            .and_then(|id| state.entries.iter().find(|e| e.id == *id))
        {
            return Ok(entry.clone());
        }

        // Validate before touching anything else so a failure leaves the
        // state byte-for-byte unchanged.
        let wallet = state
            .wallets
            .get_mut(&settlement.wallet_id)
            .filter(|w| w.user_id == settlement.user_id)
            .ok_or(StoreError::WalletNotFound)?;
        let holding_key = (settlement.wallet_id, settlement.asset_id.clone());

        match settlement.kind {
            EntryKind::Buy => {
                if wallet.balance < settlement.total_value {
                    return Err(StoreError::BalanceExhausted {
                        available: wallet.balance,
                    });
                }
                wallet.balance -= settlement.total_value;
            }
            EntryKind::Sell => {
                let held = state
                    .holdings
                    .get(&holding_key)
                    .ok_or(StoreError::HoldingNotFound)?
                    .quantity;
                if held < settlement.quantity {
                    return Err(StoreError::QuantityExhausted { held });
                }
                wallet.balance += settlement.total_value;
            }
        }

        let delta = match settlement.kind {
            EntryKind::Buy => settlement.quantity,
            EntryKind::Sell => -settlement.quantity,
        };
        let holding = state.holdings.entry(holding_key).or_insert_with(|| Holding {
            wallet_id: settlement.wallet_id,
            asset_id: settlement.asset_id.clone(),
            quantity: Decimal::ZERO,
            updated_at: settlement.executed_at,
        });
        holding.quantity += delta;
        holding.updated_at = settlement.executed_at;

        state.next_entry_id += 1;
        let entry = LedgerEntry {
            id: state.next_entry_id,
            user_id: settlement.user_id,
            wallet_id: settlement.wallet_id,
            asset_id: settlement.asset_id,
            kind: settlement.kind,
            quantity: settlement.quantity,
            unit_price: settlement.unit_price,
            total_value: settlement.total_value,
            executed_at: settlement.executed_at,
            idempotency_key: settlement.idempotency_key,
        };
        if let Some(key) = entry.idempotency_key {
            state.entries_by_key.insert(key, entry.id);
        }
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn entries_for_user(
        &self,
        user_id: i32,
        kind: Option<EntryKind>,
        page: PageRequest,
    ) -> Result<Page<LedgerEntry>, StoreError> {
        let state = self.inner.read();
        let mut matching: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.user_id == user_id && kind.map_or(true, |k| e.kind == k))
            .cloned()
            .collect();
        // Newest first; id breaks ties within the same timestamp.
        matching.sort_by(|a, b| b.executed_at.cmp(&a.executed_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .collect();
        Ok(Page {
            items,
            page: page.page,
            per_page: page.per_page,
            total,
        })
    }
}
