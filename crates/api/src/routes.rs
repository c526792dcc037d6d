use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use foliolink_core::{
    CacheRead, OrderAction, OrderConfirmation, OrderPreviewResult, OrderType, TimeInForce,
    TradeError,
};
use foliolink_orders::{OrderConfirmRequest, OrderPreviewRequest};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health
        .route("/health", get(health_check))
        // Linked accounts & balances (portfolio/summary read path)
        .route("/accounts", get(list_accounts))
        .route("/accounts/{id}/balances", get(account_balances))
        // Two-phase order protocol
        .route("/order-preview", post(order_preview))
        .route("/order-preview/confirm", post(order_confirm))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Accounts & balances
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct LinkedAccountInfo {
    account_id: String,
    institution: String,
    capability: foliolink_core::AssetCapability,
    currency: String,
}

async fn list_accounts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LinkedAccountInfo>>, ApiError> {
    let correlation_id = Uuid::new_v4();
    let accounts = state
        .connections
        .list()
        .await
        .map_err(|e| ApiError::new(e.into(), correlation_id))?;
    Ok(Json(
        accounts
            .into_iter()
            .map(|a| LinkedAccountInfo {
                account_id: a.account_id,
                institution: a.institution,
                capability: a.capability,
                currency: a.currency,
            })
            .collect(),
    ))
}

#[derive(Serialize)]
struct BalanceReadResponse {
    freshness: &'static str,
    snapshot: Option<foliolink_core::BalanceSnapshot>,
}

/// The cache never errors: a degraded read comes back tagged `stale` or
/// `unavailable` and the caller picks its own fallback.
async fn account_balances(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BalanceReadResponse>, ApiError> {
    let correlation_id = Uuid::new_v4();
    let span = tracing::info_span!("account_balances", correlation_id = %correlation_id, account = %id);

    async move {
        let account = state
            .connections
            .get(&id)
            .await
            .map_err(|e| ApiError::new(e.into(), correlation_id))?
            .ok_or_else(|| {
                ApiError::new(TradeError::AccountNotConnected(id.clone()), correlation_id)
            })?;

        let (freshness, snapshot) = match state.balances.get_snapshot(&account).await {
            CacheRead::Fresh(s) => ("fresh", Some(s)),
            CacheRead::Stale(s) => ("stale", Some(s)),
            CacheRead::Unavailable => ("unavailable", None),
        };
        Ok(Json(BalanceReadResponse {
            freshness,
            snapshot,
        }))
    }
    .instrument(span)
    .await
}

// ---------------------------------------------------------------------------
// Order preview
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct OrderPreviewHttpRequest {
    account_id: String,
    symbol: String,
    action: OrderAction,
    order_type: OrderType,
    quantity: Decimal,
    limit_price: Option<Decimal>,
    time_in_force: Option<TimeInForce>,
}

async fn order_preview(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OrderPreviewHttpRequest>,
) -> Result<Json<OrderPreviewResult>, ApiError> {
    let correlation_id = Uuid::new_v4();
    let span = tracing::info_span!("order_preview", correlation_id = %correlation_id, account = %req.account_id);

    async move {
        state
            .preview
            .preview(OrderPreviewRequest {
                account_id: req.account_id,
                symbol: req.symbol,
                action: req.action,
                order_type: req.order_type,
                quantity: req.quantity,
                limit_price: req.limit_price,
                time_in_force: req.time_in_force,
            })
            .await
            .map(Json)
            .map_err(|e| ApiError::new(e, correlation_id))
    }
    .instrument(span)
    .await
}

// ---------------------------------------------------------------------------
// Order confirm
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct OrderConfirmHttpRequest {
    account_id: String,
    /// The preview exactly as returned by `POST /order-preview`.
    preview_data: OrderPreviewResult,
    final_quantity: Option<Decimal>,
    final_limit_price: Option<Decimal>,
}

/// The confirmation plus the order parameters it was placed with, echoed for
/// the caller's audit trail.
#[derive(Serialize)]
struct OrderConfirmHttpResponse {
    #[serde(flatten)]
    confirmation: OrderConfirmation,
    preview_id: Uuid,
    symbol: String,
    action: OrderAction,
    order_type: OrderType,
    quantity: Decimal,
    limit_price: Option<Decimal>,
    time_in_force: TimeInForce,
}

async fn order_confirm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OrderConfirmHttpRequest>,
) -> Result<Json<OrderConfirmHttpResponse>, ApiError> {
    let correlation_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "order_confirm",
        correlation_id = %correlation_id,
        account = %req.account_id,
        preview_id = %req.preview_data.preview_id
    );

    async move {
        let preview = req.preview_data.clone();
        let confirmation = state
            .confirm
            .confirm(OrderConfirmRequest {
                account_id: req.account_id,
                preview: req.preview_data,
                final_quantity: req.final_quantity,
                final_limit_price: req.final_limit_price,
            })
            .await
            .map_err(|e| ApiError::new(e, correlation_id))?;

        Ok(Json(OrderConfirmHttpResponse {
            confirmation,
            preview_id: preview.preview_id,
            symbol: preview.symbol,
            action: preview.action,
            order_type: preview.order_type,
            quantity: req.final_quantity.unwrap_or(preview.quantity),
            limit_price: req.final_limit_price.or(preview.limit_price),
            time_in_force: preview.time_in_force,
        }))
    }
    .instrument(span)
    .await
}
