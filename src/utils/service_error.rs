// API error type
// Engine-level denials travel as data (Ok(false) / decisions); everything
// that reaches HTTP is mapped here to a stable machine-readable `code` so
// callers can distinguish "denied by business rule" (402/429 + metadata)
// from "could not evaluate" (5xx). Never a bare stack trace.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::payments::PaymentError;
use crate::services::purchases::PurchaseError;
use crate::services::quota::QuotaError;
use crate::services::rate_limit::RateLimitDecision;
use crate::services::storage::StorageError;
use crate::services::vision::VisionError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Resource not found")]
    NotFound,

    #[error("Save slot quota exceeded")]
    SaveQuotaExceeded,

    #[error("Creation quota exceeded")]
    CreationQuotaExceeded,

    #[error("Anonymous daily creation limit exceeded")]
    AnonymousDailyLimitExceeded(RateLimitDecision),

    #[error("Rate limit exceeded")]
    RateLimited(RateLimitDecision),

    #[error("Unknown or inactive pack: {0}")]
    UnknownPack(String),

    #[error("Invalid webhook signature")]
    InvalidWebhookSignature,

    #[error("Vision provider error: {0}")]
    VisionProvider(String),

    #[error("Storage provider error: {0}")]
    StorageProvider(String),

    #[error("Payment provider error: {0}")]
    PaymentProvider(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::SaveQuotaExceeded => "QUOTA_EXCEEDED",
            ApiError::CreationQuotaExceeded => "CREATION_QUOTA_EXCEEDED",
            ApiError::AnonymousDailyLimitExceeded(_) => "ANONYMOUS_DAILY_LIMIT_EXCEEDED",
            ApiError::RateLimited(_) => "RATE_LIMITED",
            ApiError::UnknownPack(_) => "UNKNOWN_PACK",
            ApiError::InvalidWebhookSignature => "INVALID_WEBHOOK_SIGNATURE",
            ApiError::VisionProvider(_) => "VISION_PROVIDER_ERROR",
            ApiError::StorageProvider(_) => "STORAGE_PROVIDER_ERROR",
            ApiError::PaymentProvider(_) => "PAYMENT_PROVIDER_ERROR",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::SaveQuotaExceeded
            | ApiError::CreationQuotaExceeded
            | ApiError::AnonymousDailyLimitExceeded(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UnknownPack(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidWebhookSignature => StatusCode::BAD_REQUEST,
            ApiError::VisionProvider(_)
            | ApiError::StorageProvider(_)
            | ApiError::PaymentProvider(_) => StatusCode::BAD_GATEWAY,
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Internal detail stays in the logs, not the response body.
        let message = match &self {
            ApiError::DatabaseError(detail) => {
                tracing::error!("Database error surfaced to handler: {}", detail);
                "Internal server error".to_string()
            },
            other => other.to_string(),
        };

        let mut body = json!({
            "error": message,
            "code": code,
            "status": status.as_u16(),
        });

        let decision = match &self {
            ApiError::RateLimited(d) | ApiError::AnonymousDailyLimitExceeded(d) => Some(d.clone()),
            _ => None,
        };

        if let Some(ref d) = decision {
            body["limit"] = json!(d.limit);
            body["remaining"] = json!(d.remaining);
            body["resets_at"] = json!(d.reset_at);
            body["retry_after"] = json!(d.retry_after);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(d) = decision {
            response.headers_mut().extend(d.headers());
        }
        response
    }
}

// Conversion from service error types

impl From<QuotaError> for ApiError {
    fn from(e: QuotaError) -> Self {
        ApiError::DatabaseError(e.to_string())
    }
}

impl From<PurchaseError> for ApiError {
    fn from(e: PurchaseError) -> Self {
        match e {
            PurchaseError::UnknownPack(sku) => ApiError::UnknownPack(sku),
            PurchaseError::Provider(p) => p.into(),
            PurchaseError::Database(e) => ApiError::DatabaseError(e.to_string()),
            PurchaseError::Pool(s) => ApiError::DatabaseError(s),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::InvalidSignature => ApiError::InvalidWebhookSignature,
            PaymentError::MalformedEvent(detail) => {
                ApiError::ValidationError(format!("Malformed webhook event: {}", detail))
            },
            other => ApiError::PaymentProvider(other.to_string()),
        }
    }
}

impl From<VisionError> for ApiError {
    fn from(e: VisionError) -> Self {
        ApiError::VisionProvider(e.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::StorageProvider(e.to_string())
    }
}

impl From<diesel::result::Error> for ApiError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => ApiError::NotFound,
            _ => ApiError::DatabaseError(e.to_string()),
        }
    }
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for ApiError {
    fn from(e: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        ApiError::DatabaseError(e.to_string())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        assert_eq!(ApiError::SaveQuotaExceeded.code(), "QUOTA_EXCEEDED");
        assert_eq!(
            ApiError::SaveQuotaExceeded.status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ApiError::CreationQuotaExceeded.code(),
            "CREATION_QUOTA_EXCEEDED"
        );
        assert_eq!(
            ApiError::VisionProvider("timeout".to_string()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_pack_error_mapping() {
        let err: ApiError = PurchaseError::UnknownPack("credits_99".to_string()).into();
        assert_eq!(err.code(), "UNKNOWN_PACK");
    }
}
