//! API module - Axum HTTP server and routes
//!
//! Thin layer over the trading engine: deserialization, status mapping,
//! nothing else.

mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::trading::TradingEngine;

/// Application state shared across all handlers
pub struct AppState {
    pub engine: Arc<TradingEngine>,
}

/// Create the main application router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health_check))
        // ==========================================
        // Wallets
        // ==========================================
        .route("/api/wallets", post(handlers::create_wallet))
        .route("/api/wallets", get(handlers::list_wallets))
        .route("/api/wallets/:wallet_id/name", put(handlers::rename_wallet))
        .route("/api/wallets/:wallet_id/portfolio", get(handlers::get_portfolio))
        // ==========================================
        // Trades
        // ==========================================
        .route("/api/trades/buy", post(handlers::buy))
        .route("/api/trades/sell", post(handlers::sell))
        .route("/api/trades", get(handlers::get_history))
        // ==========================================
        // Per-user aggregates
        // ==========================================
        .route("/api/users/:user_id/balance-summary", get(handlers::get_balance_summary))
        // Apply middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
