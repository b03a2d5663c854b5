//! paperfolio - simulated crypto trading ledger backend
//!
//! Users hold a fiat balance per wallet and trade simulated crypto
//! positions against externally supplied market prices. The core is the
//! [`trading::TradingEngine`]: atomic buy/sell settlement with solvency and
//! quantity invariants, portfolio valuation and an immutable trade ledger.
//! Storage and quotes are injected through the [`store::LedgerStore`] and
//! [`quotes::QuoteSource`] traits.

pub mod api;
pub mod config;
pub mod db;
pub mod money;
pub mod quotes;
pub mod store;
pub mod trading;
