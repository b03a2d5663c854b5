//! Trading module - the ledger engine
//!
//! Owns all trade arithmetic, rounding and invariant checks, and is the
//! only writer of wallet balances, holdings and ledger entries.

mod engine;

pub use engine::{
    EngineError, EngineSettings, LedgerEntryView, PortfolioItem, PortfolioView, TradingEngine,
};
