use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Caller;
use crate::error::EngineError;
use crate::lifecycle::{AdvanceRequest, OrderDetails, OrderLifecycle, PaymentEventOutcome};
use crate::models::{Inventory, Order};

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<OrderLifecycle>,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub until: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ExtendResponse {
    pub extended: usize,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub delta: BigDecimal,
}

#[derive(Debug, Deserialize)]
pub struct CouponQuery {
    pub subtotal: BigDecimal,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub outcome: PaymentEventOutcome,
}

type ApiResult<T> = Result<Json<T>, EngineError>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:order_id", get(get_order))
        .route("/orders/:order_id/cancel", post(cancel_order))
        .route("/orders/:order_id/advance", post(advance_order))
        .route("/orders/:order_id/return", post(return_order))
        .route("/orders/:order_id/payment-session", post(retry_payment_session))
        .route("/orders/:order_id/approve-payment", post(approve_payment))
        .route("/orders/:order_id/reservations/extend", post(extend_reservations))
        .route("/payments/webhook", post(payment_webhook))
        .route("/inventory/:product_id", get(stock_level))
        .route("/inventory/:product_id/adjust", post(adjust_stock))
        .route("/coupons/:code", get(evaluate_coupon))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_order(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Json(checkout): Json<Checkout>,
) -> Result<(StatusCode, Json<OrderDetails>), EngineError> {
    let details = state.lifecycle.place_order(&actor, checkout).await?;
    Ok((StatusCode::CREATED, Json(details)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderDetails> {
    Ok(Json(state.lifecycle.get_order(&actor, order_id).await?))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(order_id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> ApiResult<Order> {
    let reason = checked_reason(&state, request.reason)?;
    Ok(Json(state.lifecycle.cancel_order(&actor, order_id, reason).await?))
}

pub async fn advance_order(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(order_id): Path<Uuid>,
    Json(request): Json<AdvanceRequest>,
) -> ApiResult<Order> {
    Ok(Json(state.lifecycle.advance_order(&actor, order_id, request).await?))
}

pub async fn return_order(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(order_id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> ApiResult<Order> {
    let reason = checked_reason(&state, request.reason)?;
    Ok(Json(state.lifecycle.return_order(&actor, order_id, reason).await?))
}

pub async fn retry_payment_session(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Order> {
    Ok(Json(state.lifecycle.retry_payment_session(&actor, order_id).await?))
}

pub async fn approve_payment(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Order> {
    Ok(Json(state.lifecycle.approve_held_payment(&actor, order_id).await?))
}

pub async fn extend_reservations(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(order_id): Path<Uuid>,
    Json(request): Json<ExtendRequest>,
) -> ApiResult<ExtendResponse> {
    let extended = state
        .lifecycle
        .extend_reservations(&actor, order_id, request.until)
        .await?;
    Ok(Json(ExtendResponse { extended }))
}

/// Gateway callback. Authenticated by a shared secret instead of an actor.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<PaymentGatewayEvent>,
) -> ApiResult<WebhookResponse> {
    if let Some(secret) = &state.lifecycle.config().webhook_secret {
        let presented = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if presented != Some(secret.as_str()) {
            return Err(EngineError::Unauthenticated("webhook secret mismatch".to_string()));
        }
    }

    let outcome = state.lifecycle.handle_payment_event(event).await?;
    Ok(Json(WebhookResponse { outcome }))
}

pub async fn stock_level(
    State(state): State<AppState>,
    Caller(_actor): Caller,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Inventory> {
    Ok(Json(state.lifecycle.ledger().level(product_id).await?))
}

pub async fn adjust_stock(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(product_id): Path<Uuid>,
    Json(request): Json<AdjustRequest>,
) -> ApiResult<Inventory> {
    Ok(Json(
        state
            .lifecycle
            .ledger()
            .adjust_stock(&actor, product_id, request.delta)
            .await?,
    ))
}

pub async fn evaluate_coupon(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(code): Path<String>,
    Query(query): Query<CouponQuery>,
) -> ApiResult<CouponEvaluation> {
    Ok(Json(
        state
            .lifecycle
            .evaluate_coupon(&actor, &code, &query.subtotal)
            .await?,
    ))
}

pub async fn health_check() -> &'static str {
    "OK"
}

fn checked_reason(state: &AppState, reason: String) -> Result<String, EngineError> {
    let reason = reason.trim().to_string();
    let minimum = state.lifecycle.config().cancellation_reason_min_len;
    if reason.chars().count() < minimum {
        return Err(EngineError::Validation(format!(
            "reason must be at least {minimum} characters"
        )));
    }
    Ok(reason)
}
