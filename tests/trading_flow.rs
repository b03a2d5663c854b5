//! End-to-end trading flows against the in-memory store.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use paperfolio::db::models::{Asset, EntryKind};
use paperfolio::quotes::{QuoteSource, StaticQuotes};
use paperfolio::store::memory::MemoryStore;
use paperfolio::store::{LedgerStore, PageRequest};
use paperfolio::trading::{EngineError, EngineSettings, TradingEngine};

struct World {
    engine: Arc<TradingEngine>,
    store: Arc<MemoryStore>,
    quotes: Arc<StaticQuotes>,
}

async fn world() -> World {
    let store = Arc::new(MemoryStore::new());
    let quotes = Arc::new(StaticQuotes::new());
    store.add_user(1);
    store
        .upsert_asset(Asset {
            id: "bitcoin".to_string(),
            symbol: "BTC".to_string(),
            name: "Bitcoin".to_string(),
            current_price: Some(dec!(50000.0000)),
            change_24h: Some(1.8),
            updated_at: Some(Utc::now()),
        })
        .await
        .unwrap();

    let engine = Arc::new(TradingEngine::new(
        store.clone() as Arc<dyn LedgerStore>,
        quotes.clone() as Arc<dyn QuoteSource>,
        EngineSettings::default(),
    ));
    World {
        engine,
        store,
        quotes,
    }
}

#[tokio::test]
async fn full_buy_sell_lifecycle() {
    let w = world().await;
    let wallet = w.engine.open_wallet(1, "Main").await.unwrap();
    assert_eq!(wallet.balance, dec!(100000.0000));

    // Buy half a coin at 50000.
    w.quotes.set("bitcoin", dec!(50000.0000));
    let buy = w
        .engine
        .buy(1, wallet.id, "bitcoin", dec!(0.5), None)
        .await
        .unwrap();
    assert_eq!(buy.total_value, dec!(25000.0000));

    let view = w.engine.valuate(1, wallet.id).await.unwrap();
    assert_eq!(view.fiat_balance, dec!(75000.00));
    assert_eq!(view.items[0].quantity, dec!(0.50000000));

    // Selling more than held fails and changes nothing.
    let err = w
        .engine
        .sell(1, wallet.id, "bitcoin", dec!(0.6), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientQuantity { held, requested }
            if held == dec!(0.50000000) && requested == dec!(0.60000000)
    ));
    let holding = w.store.holding(wallet.id, "bitcoin").await.unwrap().unwrap();
    assert_eq!(holding.quantity, dec!(0.50000000));

    // Price moves up; sell the whole position.
    w.quotes.set("bitcoin", dec!(60000.0000));
    let sell = w
        .engine
        .sell(1, wallet.id, "bitcoin", dec!(0.5), None)
        .await
        .unwrap();
    assert_eq!(sell.total_value, dec!(30000.0000));

    let after = w.store.wallet_for_user(wallet.id, 1).await.unwrap().unwrap();
    assert_eq!(after.balance, dec!(105000.0000));
    let holding = w.store.holding(wallet.id, "bitcoin").await.unwrap().unwrap();
    assert_eq!(holding.quantity, dec!(0.00000000));

    // Both trades appear in the ledger, newest first.
    let history = w
        .engine
        .history(1, None, PageRequest::new(0, 10))
        .await
        .unwrap();
    assert_eq!(history.total, 2);
    assert_eq!(history.items[0].kind, EntryKind::Sell);
    assert_eq!(history.items[1].kind, EntryKind::Buy);
}

#[tokio::test]
async fn concurrent_buys_never_overdraw_the_wallet() {
    let w = world().await;
    let wallet = w.engine.open_wallet(1, "Main").await.unwrap();
    w.quotes.set("bitcoin", dec!(50000.0000));

    // 100000 of balance funds exactly four buys of 0.5 at 50000.
    let mut tasks = Vec::new();
    for _ in 0..10 {
        let engine = w.engine.clone();
        let wallet_id = wallet.id;
        tasks.push(tokio::spawn(async move {
            engine.buy(1, wallet_id, "bitcoin", dec!(0.5), None).await
        }));
    }

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(EngineError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(succeeded, 4);

    let after = w.store.wallet_for_user(wallet.id, 1).await.unwrap().unwrap();
    assert_eq!(after.balance, Decimal::ZERO);
    let holding = w.store.holding(wallet.id, "bitcoin").await.unwrap().unwrap();
    assert_eq!(holding.quantity, dec!(2.00000000));
}

#[tokio::test]
async fn concurrent_sells_never_go_below_zero_quantity() {
    let w = world().await;
    let wallet = w.engine.open_wallet(1, "Main").await.unwrap();
    w.quotes.set("bitcoin", dec!(10000.0000));

    w.engine
        .buy(1, wallet.id, "bitcoin", dec!(2), None)
        .await
        .unwrap();

    // Only four sells of 0.5 fit in a 2.0 position.
    let mut tasks = Vec::new();
    for _ in 0..10 {
        let engine = w.engine.clone();
        let wallet_id = wallet.id;
        tasks.push(tokio::spawn(async move {
            engine.sell(1, wallet_id, "bitcoin", dec!(0.5), None).await
        }));
    }

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(EngineError::InsufficientQuantity { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(succeeded, 4);

    let holding = w.store.holding(wallet.id, "bitcoin").await.unwrap().unwrap();
    assert_eq!(holding.quantity, dec!(0.00000000));
    let after = w.store.wallet_for_user(wallet.id, 1).await.unwrap().unwrap();
    // Back to the starting balance: bought 2.0 for 20000, sold 2.0 for 20000.
    assert_eq!(after.balance, dec!(100000.0000));
}

#[tokio::test]
async fn concurrent_retries_with_one_key_settle_once() {
    let w = world().await;
    let wallet = w.engine.open_wallet(1, "Main").await.unwrap();
    w.quotes.set("bitcoin", dec!(50000.0000));

    let key = uuid::Uuid::new_v4();
    let mut tasks = Vec::new();
    for _ in 0..5 {
        let engine = w.engine.clone();
        let wallet_id = wallet.id;
        tasks.push(tokio::spawn(async move {
            engine
                .buy(1, wallet_id, "bitcoin", dec!(0.5), Some(key))
                .await
        }));
    }

    let mut entry_ids = Vec::new();
    for task in tasks {
        entry_ids.push(task.await.unwrap().unwrap().id);
    }
    entry_ids.sort_unstable();
    entry_ids.dedup();
    assert_eq!(entry_ids.len(), 1);

    let after = w.store.wallet_for_user(wallet.id, 1).await.unwrap().unwrap();
    assert_eq!(after.balance, dec!(75000.0000));
}
