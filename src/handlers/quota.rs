// Quota status endpoint

use axum::{extract::State, response::IntoResponse, Json};
use chrono::{NaiveTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    models::quota::QuotaSnapshot,
    services::quota::DEFAULT_DAILY_CREATIONS,
    utils::service_error::ApiError,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct QuotaBlock {
    pub used: i32,
    pub limit: i32,
    pub remaining: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QuotaStatusResponse {
    pub is_pro: bool,
    pub creations: QuotaBlock,
    pub bonus_creations_remaining: i32,
    pub save_slots_remaining: i32,
    pub daily_resets_at: chrono::DateTime<Utc>,
}

/// Current quota status
/// GET /api/v1/quota
#[utoipa::path(
    get,
    path = "/v1/quota",
    tag = "Quota",
    operation_id = "getQuota",
    responses(
        (status = 200, description = "Quota status", body = QuotaStatusResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn get_quota(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.quota_service.get_or_init_quota(user.user_id).await?;
    Ok(Json(quota_status(snapshot)))
}

fn quota_status(snapshot: QuotaSnapshot) -> QuotaStatusResponse {
    // The free allowance resets at the next UTC midnight; bonus credits ride
    // on top of the daily limit, so remaining can exceed it.
    let next_midnight = Utc::now()
        .date_naive()
        .succ_opt()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or_else(Utc::now);

    QuotaStatusResponse {
        is_pro: snapshot.is_pro,
        creations: QuotaBlock {
            used: (DEFAULT_DAILY_CREATIONS - snapshot.creations_remaining_today).max(0),
            limit: DEFAULT_DAILY_CREATIONS,
            remaining: snapshot.total_creations_remaining(),
        },
        bonus_creations_remaining: snapshot.bonus_creations_remaining,
        save_slots_remaining: snapshot.save_slots_remaining,
        daily_resets_at: next_midnight,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_status_shape() {
        let snapshot = QuotaSnapshot {
            save_slots_remaining: 8,
            creations_remaining_today: 3,
            bonus_creations_remaining: 25,
            last_creation_reset: Utc::now(),
            is_pro: false,
        };

        let status = quota_status(snapshot);
        assert_eq!(status.creations.used, 7);
        assert_eq!(status.creations.limit, DEFAULT_DAILY_CREATIONS);
        assert_eq!(status.creations.remaining, 28);
        assert_eq!(status.save_slots_remaining, 8);
    }
}
