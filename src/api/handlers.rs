//! API request handlers
//!
//! Endpoint handlers for wallets, trades and portfolio views. Business
//! rules live in the engine; handlers only translate requests and map
//! errors to status codes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::api::AppState;
use crate::db::models::EntryKind;
use crate::store::PageRequest;
use crate::trading::EngineError;

// ==========================================
// Error Mapping
// ==========================================

pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::InvalidQuantity => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InsufficientFunds { .. } | EngineError::InsufficientQuantity { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::PriceUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal detail stays in the logs.
        let message = match &self.0 {
            EngineError::Internal(detail) => {
                error!("Internal error surfaced to API: {}", detail);
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(serde_json::json!({
                "success": false,
                "error": message
            })),
        )
            .into_response()
    }
}

fn ok<T: serde::Serialize>(data: T) -> Response {
    Json(serde_json::json!({
        "success": true,
        "data": data
    }))
    .into_response()
}

// ==========================================
// Request Types
// ==========================================

#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    pub user_id: i32,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameWalletRequest {
    pub user_id: i32,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct TradeRequest {
    pub user_id: i32,
    pub wallet_id: i64,
    pub asset_id: String,
    pub quantity: Decimal,
    pub idempotency_key: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub user_id: i32,
    pub kind: Option<EntryKind>,
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_per_page() -> i64 {
    20
}

// ==========================================
// Handlers
// ==========================================

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "paperfolio",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn create_wallet(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateWalletRequest>,
) -> Result<Response, ApiError> {
    let wallet = state.engine.open_wallet(req.user_id, &req.name).await?;
    Ok(ok(wallet))
}

pub async fn list_wallets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Result<Response, ApiError> {
    let wallets = state.engine.wallets(query.user_id).await?;
    Ok(ok(wallets))
}

pub async fn rename_wallet(
    State(state): State<Arc<AppState>>,
    Path(wallet_id): Path<i64>,
    Json(req): Json<RenameWalletRequest>,
) -> Result<Response, ApiError> {
    let wallet = state
        .engine
        .rename_wallet(req.user_id, wallet_id, &req.name)
        .await?;
    Ok(ok(wallet))
}

pub async fn get_portfolio(
    State(state): State<Arc<AppState>>,
    Path(wallet_id): Path<i64>,
    Query(query): Query<UserQuery>,
) -> Result<Response, ApiError> {
    let view = state.engine.valuate(query.user_id, wallet_id).await?;
    Ok(ok(view))
}

pub async fn buy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TradeRequest>,
) -> Result<Response, ApiError> {
    let entry = state
        .engine
        .buy(
            req.user_id,
            req.wallet_id,
            &req.asset_id,
            req.quantity,
            req.idempotency_key,
        )
        .await?;
    Ok(ok(entry))
}

pub async fn sell(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TradeRequest>,
) -> Result<Response, ApiError> {
    let entry = state
        .engine
        .sell(
            req.user_id,
            req.wallet_id,
            &req.asset_id,
            req.quantity,
            req.idempotency_key,
        )
        .await?;
    Ok(ok(entry))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let page = state
        .engine
        .history(
            query.user_id,
            query.kind,
            PageRequest::new(query.page, query.per_page),
        )
        .await?;
    Ok(ok(page))
}

pub async fn get_balance_summary(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i32>,
) -> Result<Response, ApiError> {
    let fiat_total = state.engine.fiat_total(user_id).await?;
    let crypto_total = state.engine.crypto_value_total(user_id).await?;

    Ok(ok(serde_json::json!({
        "fiat_total": fiat_total,
        "crypto_total": crypto_total,
        "portfolio_total": fiat_total + crypto_total,
    })))
}
