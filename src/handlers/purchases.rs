// Pack catalog and checkout handlers

use axum::{extract::State, response::IntoResponse, Json};
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    models::pack::{CreditPack, PackResponse},
    models::purchase::{Purchase, PurchaseResponse},
    utils::service_error::ApiError,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCheckoutRequest {
    #[validate(length(min = 1, max = 50, message = "sku is required"))]
    pub sku: String,

    /// Client-scoped dedup token; generated server-side when omitted.
    /// Retrying with the same key returns the prior session instead of
    /// creating a second checkout.
    #[validate(length(min = 8, max = 255, message = "idempotency_key must be 8-255 characters"))]
    pub idempotency_key: Option<String>,
}

/// Active pack catalog
/// GET /api/v1/packs
#[utoipa::path(
    get,
    path = "/v1/packs",
    tag = "Purchases",
    operation_id = "listPacks",
    responses(
        (status = 200, description = "Active packs", body = [PackResponse])
    )
)]
pub async fn list_packs(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let mut conn = state.diesel_pool.get().await?;
    let packs = CreditPack::list_active(&mut conn).await?;

    Ok(Json(
        packs.into_iter().map(PackResponse::from).collect::<Vec<_>>(),
    ))
}

/// Initiate a pack checkout session
/// POST /api/v1/purchases/checkout
#[utoipa::path(
    post,
    path = "/v1/purchases/checkout",
    tag = "Purchases",
    operation_id = "createCheckout",
    request_body = CreateCheckoutRequest,
    responses(
        (status = 200, description = "Checkout session (new or previously created)"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Unknown or inactive pack"),
        (status = 502, description = "Payment provider failure")
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn create_checkout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.validate()?;

    let idempotency_key = request.idempotency_key.unwrap_or_else(generate_idempotency_key);

    let initiation = state
        .purchase_service
        .create_checkout(user.user_id, &request.sku, &idempotency_key)
        .await?;

    Ok(Json(json!({
        "purchase_id": initiation.purchase_id,
        "session_id": initiation.session_id,
        "checkout_url": initiation.checkout_url,
        "idempotency_key": idempotency_key,
        "already_completed": initiation.already_completed,
    })))
}

/// Own purchase history
/// GET /api/v1/purchases
#[utoipa::path(
    get,
    path = "/v1/purchases",
    tag = "Purchases",
    operation_id = "listPurchases",
    responses(
        (status = 200, description = "Purchase history", body = [PurchaseResponse]),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn list_purchases(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let mut conn = state.diesel_pool.get().await?;
    let purchases = Purchase::find_by_user(&mut conn, user.user_id).await?;

    Ok(Json(
        purchases
            .into_iter()
            .map(PurchaseResponse::from)
            .collect::<Vec<_>>(),
    ))
}

fn generate_idempotency_key() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("chk_{}", token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_are_unique_and_prefixed() {
        let a = generate_idempotency_key();
        let b = generate_idempotency_key();
        assert!(a.starts_with("chk_"));
        assert_eq!(a.len(), 28);
        assert_ne!(a, b);
    }
}
