// Authentication middleware
// Verifies bearer tokens minted by the external auth provider and injects the
// verified identity into request extensions. This service never handles
// credentials beyond signature verification; the provider owns sessions.

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{header, request::Parts, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::utils::service_error::ApiError;

/// Verified identity extracted from a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub plan: String,
    pub exp: u64,
}

impl AuthenticatedUser {
    pub fn is_pro(&self) -> bool {
        self.plan == "pro"
    }
}

/// Claims shape issued by the auth provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub plan: Option<String>,
    pub exp: u64,
    pub iss: String,
    pub aud: String,
}

/// Verify a provider-issued bearer token (HS256, issuer/audience pinned).
pub fn verify_bearer(token: &str) -> Result<AuthenticatedUser, String> {
    let auth = &crate::app_config::config().auth;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&auth.jwt_issuer]);
    validation.set_audience(&[&auth.jwt_audience]);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| e.to_string())?;

    let user_id =
        Uuid::parse_str(&data.claims.sub).map_err(|_| "subject is not a user id".to_string())?;

    Ok(AuthenticatedUser {
        user_id,
        plan: data.claims.plan.unwrap_or_else(|| "free".to_string()),
        exp: data.claims.exp,
    })
}

fn bearer_token(request_headers: &axum::http::HeaderMap) -> Option<&str> {
    request_headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Middleware for protected routes: rejects missing/invalid tokens and adds
/// AuthenticatedUser to request extensions.
pub async fn auth_middleware(mut request: Request<Body>, next: Next) -> Response {
    let token = match bearer_token(request.headers()) {
        Some(token) => token.to_string(),
        None => {
            return ApiError::Unauthorized("Missing or invalid authorization header".to_string())
                .into_response();
        },
    };

    match verify_bearer(&token) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        },
        Err(e) => {
            warn!("Bearer verification failed: {}", e);
            ApiError::Unauthorized("Invalid or expired token".to_string()).into_response()
        },
    }
}

/// Extractor for handlers behind auth_middleware.
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))
    }
}

/// Optional identity for endpoints that serve both anonymous and
/// authenticated traffic. A missing header is anonymous; a present but
/// invalid token is rejected rather than silently downgraded.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<AuthenticatedUser>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(MaybeUser(Some(user.clone())));
        }

        if !parts.headers.contains_key(header::AUTHORIZATION) {
            return Ok(MaybeUser(None));
        }

        let token = bearer_token(&parts.headers).ok_or_else(|| {
            ApiError::Unauthorized("Invalid authorization header".to_string())
        })?;

        let user = verify_bearer(token).map_err(|e| {
            warn!("Bearer verification failed: {}", e);
            ApiError::Unauthorized("Invalid or expired token".to_string())
        })?;

        Ok(MaybeUser(Some(user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    // Config only needs a parseable DATABASE_URL; nothing here connects.
    fn ensure_config() {
        if std::env::var("DATABASE_URL").is_err() {
            std::env::set_var("DATABASE_URL", "postgresql://localhost/snaplist_dev");
        }
    }

    fn token_for(claims: &Claims) -> String {
        ensure_config();
        let secret = &crate::app_config::config().auth.jwt_secret;
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn valid_claims() -> Claims {
        ensure_config();
        let auth = &crate::app_config::config().auth;
        Claims {
            sub: Uuid::new_v4().to_string(),
            plan: Some("pro".to_string()),
            exp: (chrono::Utc::now().timestamp() + 3600) as u64,
            iss: auth.jwt_issuer.clone(),
            aud: auth.jwt_audience.clone(),
        }
    }

    #[test]
    fn test_verify_roundtrip() {
        let claims = valid_claims();
        let user = verify_bearer(&token_for(&claims)).unwrap();
        assert_eq!(user.user_id.to_string(), claims.sub);
        assert!(user.is_pro());
    }

    #[test]
    fn test_verify_rejects_wrong_issuer() {
        let mut claims = valid_claims();
        claims.iss = "someone-else".to_string();
        assert!(verify_bearer(&token_for(&claims)).is_err());
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let mut claims = valid_claims();
        claims.exp = (chrono::Utc::now().timestamp() - 60) as u64;
        assert!(verify_bearer(&token_for(&claims)).is_err());
    }

    #[test]
    fn test_verify_rejects_non_uuid_subject() {
        let mut claims = valid_claims();
        claims.sub = "admin".to_string();
        assert!(verify_bearer(&token_for(&claims)).is_err());
    }

    #[test]
    fn test_missing_plan_defaults_to_free() {
        let mut claims = valid_claims();
        claims.plan = None;
        let user = verify_bearer(&token_for(&claims)).unwrap();
        assert_eq!(user.plan, "free");
        assert!(!user.is_pro());
    }
}
