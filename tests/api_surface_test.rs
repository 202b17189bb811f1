// HTTP surface tests
// Drives the assembled router end to end: auth gating, stable error codes,
// the public catalog, and the quota status shape for a brand-new user.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

use snaplist_backend_core::middleware::auth::Claims;
use snaplist_backend_core::services::{
    HttpObjectStore, HttpPaymentClient, OpenAiVisionClient, PurchaseService, QuotaService,
    RateLimitService,
};
use snaplist_backend_core::{app_config, build_router, AppState, RateLimitingConfig};

use common::{fresh_user, setup_pool};

async fn test_app() -> axum::Router {
    let pool = setup_pool().await;
    let config = app_config::config();

    let payments = Arc::new(HttpPaymentClient::new(&config.payments).expect("payment client"));

    let state = AppState {
        config: Arc::new(config.clone()),
        diesel_pool: pool.clone(),
        quota_service: Arc::new(QuotaService::new(pool.clone())),
        purchase_service: Arc::new(PurchaseService::new(pool.clone(), payments.clone())),
        rate_limit_service: Arc::new(RateLimitService::new(pool.clone())),
        rate_limit_config: Arc::new(RateLimitingConfig::from_env()),
        vision: Arc::new(OpenAiVisionClient::new(&config.vision).expect("vision client")),
        storage: Arc::new(HttpObjectStore::new(&config.storage).expect("storage client")),
        payments,
        max_connections: config.database_max_connections,
    };

    build_router(state)
}

fn bearer_for(user: Uuid) -> String {
    let auth = &app_config::config().auth;
    let claims = Claims {
        sub: user.to_string(),
        plan: Some("free".to_string()),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
        iss: auth.jwt_issuer.clone(),
        aud: auth.jwt_audience.clone(),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(auth.jwt_secret.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_healthy() {
    let app = test_app().await;

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "snaplist-backend");
}

#[tokio::test]
async fn quota_endpoint_requires_authentication() {
    let app = test_app().await;

    let response = app
        .oneshot(Request::get("/api/v1/quota").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn quota_endpoint_returns_blocks_for_new_user() {
    let app = test_app().await;
    let user = fresh_user();

    let response = app
        .oneshot(
            Request::get("/api/v1/quota")
                .header(header::AUTHORIZATION, bearer_for(user))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["is_pro"], false);
    assert_eq!(body["creations"]["used"], 0);
    assert_eq!(body["creations"]["limit"], 10);
    assert_eq!(body["creations"]["remaining"], 10);
    assert_eq!(body["save_slots_remaining"], 10);
}

#[tokio::test]
async fn pack_catalog_is_public() {
    let app = test_app().await;

    let response = app
        .oneshot(Request::get("/api/v1/packs").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let skus: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["sku"].as_str())
        .collect();
    assert!(skus.contains(&"credits_25"));
}

#[tokio::test]
async fn checkout_with_unknown_pack_is_a_stable_error() {
    let app = test_app().await;
    let user = fresh_user();

    let response = app
        .oneshot(
            Request::post("/api/v1/purchases/checkout")
                .header(header::AUTHORIZATION, bearer_for(user))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"sku":"credits_9999"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "UNKNOWN_PACK");
}

#[tokio::test]
async fn webhook_without_signature_is_rejected() {
    let app = test_app().await;

    let response = app
        .oneshot(
            Request::post("/api/v1/webhooks/payment")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"type":"checkout.session.completed"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "INVALID_WEBHOOK_SIGNATURE");
}

#[tokio::test]
async fn signed_webhook_credits_the_account() {
    let app = test_app().await;
    let user = fresh_user();
    let config = app_config::config();
    let payments = HttpPaymentClient::new(&config.payments).unwrap();

    let session = format!("cs_{}", Uuid::new_v4().simple());
    let key = format!("idem_{}", Uuid::new_v4().simple());
    let payload = serde_json::json!({
        "id": "evt_test",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session,
            "amount_total": 499,
            "client_reference_id": user.to_string(),
            "metadata": {
                "user_id": user.to_string(),
                "sku": "credits_25",
                "idempotency_key": key,
            }
        }}
    })
    .to_string();

    let signature = payments.sign_payload(payload.as_bytes(), chrono::Utc::now());

    let send = |app: axum::Router, payload: String, signature: String| async move {
        app.oneshot(
            Request::post("/api/v1/webhooks/payment")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-payment-signature", signature)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap()
    };

    let response = send(app.clone(), payload.clone(), signature.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["creations_added"], 25);
    assert_eq!(body["already_applied"], false);

    // Redelivery: acknowledged, nothing granted twice.
    let response = send(app, payload, signature).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["already_applied"], true);
    assert_eq!(body["creations_added"], 0);
}
