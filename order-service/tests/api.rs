use axum::body::Body;
use axum::http::{Request, StatusCode};
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::AsyncPgConnection;
use order_service::api::{create_router, AppState, WEBHOOK_SECRET_HEADER};
use order_service::auth::{ID_HEADER, ROLE_HEADER};
use order_service::{EngineConfig, OrderLifecycle};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

// None of these requests reach the database, so the pool never connects.
fn app() -> axum::Router {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new("postgres://unused@localhost/unused");
    let pool = Pool::builder().build_unchecked(manager);
    let config = EngineConfig {
        webhook_secret: Some("whsec_test".to_string()),
        ..EngineConfig::default()
    };
    create_router(AppState {
        lifecycle: Arc::new(OrderLifecycle::new(pool, config)),
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_orders_require_an_actor() {
    let response = app()
        .oneshot(
            Request::get(format!("/orders/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "unauthenticated");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_short_cancellation_reason_is_rejected_at_the_boundary() {
    let response = app()
        .oneshot(
            Request::post(format!("/orders/{}/cancel", Uuid::new_v4()))
                .header(ROLE_HEADER, "buyer")
                .header(ID_HEADER, Uuid::new_v4().to_string())
                .header("content-type", "application/json")
                .body(Body::from(json!({ "reason": "nah" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "validation_failed");
}

#[tokio::test]
async fn test_webhook_requires_the_shared_secret() {
    let event = json!({
        "event_id": "evt_1",
        "order_id": Uuid::new_v4(),
        "type": "failed",
        "reason": "card declined",
        "occurred_at": "2024-06-01T10:00:00Z"
    });
    let response = app()
        .oneshot(
            Request::post("/payments/webhook")
                .header(WEBHOOK_SECRET_HEADER, "wrong")
                .header("content-type", "application/json")
                .body(Body::from(event.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_system_role_cannot_be_claimed() {
    let response = app()
        .oneshot(
            Request::post(format!("/orders/{}/approve-payment", Uuid::new_v4()))
                .header(ROLE_HEADER, "system")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
