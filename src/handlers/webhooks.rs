// Payment webhook handler
// Raw-body signature verification, then hand the normalized event to the
// Purchase Reconciler. Deliveries are at-least-once; a duplicate is answered
// with 200 and already_applied so the provider stops retrying.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::{
    app::AppState,
    services::payments::{HttpPaymentClient, SIGNATURE_HEADER},
    utils::service_error::ApiError,
};

/// Payment provider event notifications
/// POST /api/v1/webhooks/payment
#[utoipa::path(
    post,
    path = "/v1/webhooks/payment",
    tag = "Webhooks",
    operation_id = "paymentWebhook",
    responses(
        (status = 200, description = "Event processed (or recognized as duplicate)"),
        (status = 400, description = "Invalid signature or malformed event"),
        (status = 404, description = "Event references an unknown pack")
    )
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::InvalidWebhookSignature)?;

    state.payments.verify_signature(&body, signature, Utc::now())?;

    let event = HttpPaymentClient::parse_event(&body)?;

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let user_id = event.user_id.ok_or_else(|| {
                ApiError::ValidationError("Event carries no user correlation".to_string())
            })?;

            // The checkout flow stamps our ledger key into the session
            // metadata; events from outside that flow fall back to the
            // session id, which is unique per payment.
            let idempotency_key = event
                .idempotency_key
                .clone()
                .unwrap_or_else(|| event.session_id.clone());

            let grant = match event.sku.as_deref() {
                Some(sku) => {
                    state
                        .purchase_service
                        .apply_pack_credits(
                            user_id,
                            sku,
                            &idempotency_key,
                            event.amount_cents,
                            Some(&event.session_id),
                            None,
                        )
                        .await?
                },
                None => {
                    let amount = event.amount_cents.ok_or_else(|| {
                        ApiError::ValidationError(
                            "Event carries neither pack metadata nor an amount".to_string(),
                        )
                    })?;
                    state
                        .purchase_service
                        .recover_purchase_from_amount(
                            user_id,
                            amount,
                            &idempotency_key,
                            Some(&event.session_id),
                        )
                        .await?
                },
            };

            Ok(Json(json!({
                "received": true,
                "creations_added": grant.creations_added,
                "saves_added": grant.saves_added,
                "already_applied": grant.already_applied,
            })))
        },
        "checkout.session.expired" => {
            state
                .purchase_service
                .mark_failed_by_session(&event.session_id)
                .await?;
            Ok(Json(json!({ "received": true })))
        },
        "charge.refunded" => {
            state
                .purchase_service
                .mark_refunded_by_session(&event.session_id)
                .await?;
            Ok(Json(json!({ "received": true })))
        },
        other => {
            info!("Ignoring payment event type: {}", other);
            Ok(Json(json!({ "received": true, "ignored": true })))
        },
    }
}
