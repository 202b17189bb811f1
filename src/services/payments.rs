// Payment provider client
// Two jobs at the boundary: create hosted checkout sessions (idempotent per
// client-supplied key) and authenticate inbound webhook deliveries. The
// reconciliation itself lives in services/purchases.rs; this module never
// touches the ledger.

use chrono::{DateTime, Utc};
use ring::hmac;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::app_config::PaymentConfig;
use crate::models::pack::CreditPack;

/// Signature header format: `t=<unix seconds>,v1=<base64 hmac-sha256>`,
/// where the MAC covers `"{t}.{raw body}"`.
pub const SIGNATURE_HEADER: &str = "x-payment-signature";

/// Deliveries older than this are rejected to blunt replay.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Payment provider returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Malformed webhook event: {0}")]
    MalformedEvent(String),
}

/// Hosted checkout session minted by the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Normalized webhook event. `metadata` round-trips what checkout creation
/// attached: user id, sku, and the purchase idempotency key.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub id: String,
    pub event_type: String,
    pub session_id: String,
    pub user_id: Option<Uuid>,
    pub sku: Option<String>,
    pub idempotency_key: Option<String>,
    pub amount_cents: Option<i32>,
}

pub struct HttpPaymentClient {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    webhook_key: hmac::Key,
    success_url: String,
    cancel_url: String,
}

impl HttpPaymentClient {
    pub fn new(config: &PaymentConfig) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            webhook_key: hmac::Key::new(hmac::HMAC_SHA256, config.webhook_secret.as_bytes()),
            success_url: config.success_url.clone(),
            cancel_url: config.cancel_url.clone(),
        })
    }

    /// Ask the provider for a hosted checkout session. The Idempotency-Key
    /// header makes provider-side session creation safe to retry; the
    /// metadata is what comes back on the completion webhook and lets the
    /// reconciler correlate the payment with a user, a pack, and our ledger
    /// idempotency key.
    #[instrument(skip(self, pack))]
    pub async fn create_checkout_session(
        &self,
        user_id: Uuid,
        pack: &CreditPack,
        idempotency_key: &str,
    ) -> Result<CheckoutSession, PaymentError> {
        let params = [
            ("mode", "payment".to_string()),
            ("client_reference_id", user_id.to_string()),
            ("success_url", self.success_url.clone()),
            ("cancel_url", self.cancel_url.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price]",
                pack.provider_price_id.clone().unwrap_or_default(),
            ),
            ("metadata[user_id]", user_id.to_string()),
            ("metadata[sku]", pack.sku.clone()),
            ("metadata[idempotency_key]", idempotency_key.to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("idempotency-key", idempotency_key)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Checkout session creation failed with {}", status);
            return Err(PaymentError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<CheckoutSession>().await?)
    }

    /// Authenticate a webhook delivery. Constant-time MAC comparison via
    /// `ring`; the embedded timestamp must be within the replay tolerance.
    pub fn verify_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        let mut timestamp: Option<i64> = None;
        let mut signature: Option<Vec<u8>> = None;

        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => {
                    use base64::{engine::general_purpose::STANDARD, Engine as _};
                    signature = STANDARD.decode(value).ok();
                },
                _ => {},
            }
        }

        let (timestamp, signature) = match (timestamp, signature) {
            (Some(t), Some(s)) => (t, s),
            _ => return Err(PaymentError::InvalidSignature),
        };

        if (now.timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(PaymentError::InvalidSignature);
        }

        let mut signed = Vec::with_capacity(payload.len() + 12);
        signed.extend_from_slice(timestamp.to_string().as_bytes());
        signed.push(b'.');
        signed.extend_from_slice(payload);

        hmac::verify(&self.webhook_key, &signed, &signature)
            .map_err(|_| PaymentError::InvalidSignature)
    }

    /// Parse a verified webhook body into a normalized event.
    pub fn parse_event(payload: &[u8]) -> Result<PaymentEvent, PaymentError> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::MalformedEvent(e.to_string()))?;

        let event_type = value["type"]
            .as_str()
            .ok_or_else(|| PaymentError::MalformedEvent("missing event type".to_string()))?
            .to_string();

        let object = &value["data"]["object"];
        let session_id = object["id"]
            .as_str()
            .ok_or_else(|| PaymentError::MalformedEvent("missing session id".to_string()))?
            .to_string();

        let metadata = &object["metadata"];
        let user_id = metadata["user_id"]
            .as_str()
            .or_else(|| object["client_reference_id"].as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        let string_field = |v: &serde_json::Value| {
            v.as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(PaymentEvent {
            id: value["id"].as_str().unwrap_or_default().to_string(),
            event_type,
            session_id,
            user_id,
            sku: string_field(&metadata["sku"]),
            idempotency_key: string_field(&metadata["idempotency_key"]),
            amount_cents: object["amount_total"]
                .as_i64()
                .and_then(|v| i32::try_from(v).ok()),
        })
    }

    /// Build the signature header for a payload. Test-side counterpart of
    /// `verify_signature`; also handy for local webhook replay tooling.
    pub fn sign_payload(&self, payload: &[u8], timestamp: DateTime<Utc>) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let ts = timestamp.timestamp();
        let mut signed = Vec::with_capacity(payload.len() + 12);
        signed.extend_from_slice(ts.to_string().as_bytes());
        signed.push(b'.');
        signed.extend_from_slice(payload);

        let tag = hmac::sign(&self.webhook_key, &signed);
        format!("t={},v1={}", ts, STANDARD.encode(tag.as_ref()))
    }
}
