// Image analysis endpoint
// The one endpoint serving both anonymous and authenticated traffic, and the
// reference composition of the Rate/Quota Gateway with the Quota Engine:
// read-only admission checks first, the expensive vision + storage work in
// the middle, and only after confirmed success the authoritative decrement
// and counter recording. A timeout or upstream failure therefore never costs
// the caller quota.

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use crate::{
    app::AppState,
    middleware::auth::MaybeUser,
    services::quota::DEFAULT_DAILY_CREATIONS,
    services::rate_limit::{rate_limit_identifier, RateLimitDecision},
    services::vision::parse_listing_draft,
    utils::service_error::ApiError,
};

// Distinct counter keys per window: the windows share an endpoint but floor
// to different boundaries, and coinciding boundaries must not share rows.
const ENDPOINT_DAILY: &str = "analyze:daily";
const ENDPOINT_BURST: &str = "analyze:burst";
const ENDPOINT_SUSTAINED: &str = "analyze:sustained";

const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Analyze an item photo into a listing draft
/// POST /api/v1/listings/analyze
#[utoipa::path(
    post,
    path = "/v1/listings/analyze",
    tag = "Listings",
    operation_id = "analyzeListingImage",
    responses(
        (status = 200, description = "Draft generated"),
        (status = 400, description = "Bad request - missing or invalid image"),
        (status = 402, description = "Creation quota or anonymous daily limit exceeded"),
        (status = 429, description = "Too many requests - rate limit exceeded"),
        (status = 502, description = "Vision or storage provider failure")
    ),
    security(
        (),
        ("bearerAuth" = [])
    )
)]
pub async fn analyze_listing_image(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let identifier =
        rate_limit_identifier(user.as_ref().map(|u| u.user_id), forwarded_for);
    let authenticated = user.is_some();
    let policies = &state.rate_limit_config;

    // Admission, cheapest and most user-visible rule first. All read-only:
    // nothing is counted until the downstream work succeeds.
    if !authenticated {
        let daily = state
            .rate_limit_service
            .check(&identifier, ENDPOINT_DAILY, policies.anonymous_daily)
            .await;
        if !daily.allowed {
            return Err(ApiError::AnonymousDailyLimitExceeded(daily));
        }
    }

    let burst = state
        .rate_limit_service
        .check(&identifier, ENDPOINT_BURST, policies.burst)
        .await;
    if !burst.allowed {
        return Err(ApiError::RateLimited(burst));
    }

    let sustained_policy = policies.sustained_for(authenticated);
    let sustained = state
        .rate_limit_service
        .check(&identifier, ENDPOINT_SUSTAINED, sustained_policy)
        .await;
    if !sustained.allowed {
        return Err(ApiError::RateLimited(sustained));
    }

    // Authenticated users are gated by their quota, not the anonymous cap.
    if let Some(ref user) = user {
        let snapshot = state.quota_service.get_or_init_quota(user.user_id).await?;
        if !snapshot.is_pro && snapshot.total_creations_remaining() < 1 {
            return Err(ApiError::CreationQuotaExceeded);
        }
    }

    let (image, mime) = read_image_field(multipart).await?;

    // Side-effecting work. Failures here are terminal for the request and
    // must not consume quota.
    let raw = state.vision.analyze_image(&image, &mime).await?;
    let draft = parse_listing_draft(&raw)?;
    let image_path = state.storage.store(&image, &mime).await?;

    let image_url = match state
        .storage
        .signed_url(&image_path, state.config.storage.signed_url_ttl_secs)
        .await
    {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("Could not mint signed URL for {}: {}", image_path, e);
            None
        },
    };

    // Success confirmed: now the authoritative decrement, then counting.
    let mut quota_block = None;
    if let Some(ref user) = user {
        let consumed = state
            .quota_service
            .decrement_creation_quota(user.user_id, 1)
            .await?;
        if !consumed {
            // Lost a race against concurrent requests for the same account.
            return Err(ApiError::CreationQuotaExceeded);
        }
        let snapshot = state.quota_service.get_or_init_quota(user.user_id).await?;
        quota_block = Some(json!({
            "used": (DEFAULT_DAILY_CREATIONS - snapshot.creations_remaining_today).max(0),
            "limit": DEFAULT_DAILY_CREATIONS,
            "remaining": snapshot.total_creations_remaining(),
        }));
    }

    let mut daily_decision: Option<RateLimitDecision> = None;
    if !authenticated {
        daily_decision = Some(
            state
                .rate_limit_service
                .record(&identifier, ENDPOINT_DAILY, policies.anonymous_daily)
                .await,
        );
    }
    state
        .rate_limit_service
        .record(&identifier, ENDPOINT_BURST, policies.burst)
        .await;
    let sustained = state
        .rate_limit_service
        .record(&identifier, ENDPOINT_SUSTAINED, sustained_policy)
        .await;

    let body = json!({
        "analysis": draft,
        "image_path": image_path,
        "image_url": image_url,
        "quota": quota_block,
        "anonymous_remaining_today": daily_decision.as_ref().map(|d| d.remaining),
    });

    let mut response = (StatusCode::OK, Json(body)).into_response();
    response.headers_mut().extend(sustained.headers());
    Ok(response)
}

async fn read_image_field(mut multipart: Multipart) -> Result<(Vec<u8>, String), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::ValidationError(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let mime = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
            return Err(ApiError::ValidationError(format!(
                "Unsupported image type: {}",
                mime
            )));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::ValidationError(format!("Could not read image: {}", e)))?;

        if data.is_empty() {
            return Err(ApiError::ValidationError("Image is empty".to_string()));
        }
        if data.len() > MAX_IMAGE_BYTES {
            return Err(ApiError::ValidationError(format!(
                "Image exceeds the {}MB limit",
                MAX_IMAGE_BYTES / (1024 * 1024)
            )));
        }

        return Ok((data.to_vec(), mime));
    }

    Err(ApiError::ValidationError(
        "Multipart field 'image' is required".to_string(),
    ))
}
