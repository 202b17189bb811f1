// Rate/Quota Gateway
// Windowed request counters in the ledger store, keyed by
// (identifier, endpoint, window_start). One mechanism serves both abuse
// prevention and the anonymous daily creation cap: identifiers are opaque
// "user:<id>" / "ip:<addr>" strings with no FK into the user table.
//
// Two entry points with one windowing rule: `check` answers "would this be
// allowed" without mutating anything (call it before expensive or fallible
// work), `record` counts a completed event and re-evaluates. On store errors
// the gateway fails OPEN - an infrastructure hiccup must not block
// legitimate traffic. The Quota Engine makes the opposite choice; see
// services/quota.rs.

use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::WindowPolicy;
use crate::db::DieselPool;

/// Counter rows older than this are dead weight and get swept.
const COUNTER_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for RateLimitError {
    fn from(e: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        RateLimitError::Pool(e.to_string())
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request is allowed
    pub allowed: bool,

    /// The window's limit
    pub limit: i32,

    /// Remaining requests in the current window
    pub remaining: i32,

    /// When the current window rolls over
    pub reset_at: DateTime<Utc>,

    /// Seconds until the window rolls over (only when denied)
    pub retry_after: Option<i64>,
}

impl RateLimitDecision {
    /// Standard rate-limit response headers, attached to success and failure
    /// responses alike.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from(self.reset_at.timestamp()),
        );
        if let Some(retry_after) = self.retry_after {
            headers.insert("retry-after", HeaderValue::from(retry_after));
        }
        headers
    }
}

/// Floor `now` to the start of its window slot. Deterministic in wall-clock
/// time, so every instance computes the same boundary: a 60-minute window
/// starts on the hour, a 1440-minute window at UTC day-start.
pub fn window_start(now: DateTime<Utc>, window_minutes: i64) -> DateTime<Utc> {
    let window_secs = window_minutes.max(1) * 60;
    let floored = now.timestamp() - now.timestamp().rem_euclid(window_secs);
    DateTime::from_timestamp(floored, 0).unwrap_or(now)
}

/// Derive the counting identity for a request: the verified user when
/// authenticated, otherwise the first (client-nearest) forwarded address.
pub fn rate_limit_identifier(user_id: Option<Uuid>, forwarded_for: Option<&str>) -> String {
    match user_id {
        Some(id) => format!("user:{}", id),
        None => {
            let ip = forwarded_for
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("unknown");
            format!("ip:{}", ip)
        },
    }
}

pub struct RateLimitService {
    pool: DieselPool,
}

impl RateLimitService {
    pub fn new(pool: DieselPool) -> Self {
        Self { pool }
    }

    /// Read-only admission probe: would a counted event be allowed right
    /// now? No state is mutated, so failed downstream work never counts
    /// against the caller.
    #[instrument(skip(self))]
    pub async fn check(
        &self,
        identifier: &str,
        endpoint: &str,
        policy: WindowPolicy,
    ) -> RateLimitDecision {
        match self.try_check(identifier, endpoint, policy).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(identifier, endpoint, "Rate limit check failed, failing open: {}", e);
                Self::fail_open(policy)
            },
        }
    }

    /// Count a completed event and re-evaluate the window. Call only after
    /// the gated operation has succeeded, so the limit tracks completed work
    /// rather than attempts.
    #[instrument(skip(self))]
    pub async fn record(
        &self,
        identifier: &str,
        endpoint: &str,
        policy: WindowPolicy,
    ) -> RateLimitDecision {
        match self.try_record(identifier, endpoint, policy).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(identifier, endpoint, "Rate limit record failed, failing open: {}", e);
                Self::fail_open(policy)
            },
        }
    }

    async fn try_check(
        &self,
        identifier: &str,
        endpoint: &str,
        policy: WindowPolicy,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let slot = window_start(now, policy.window_minutes);

        let count = Self::current_count(&mut conn, identifier, endpoint, slot).await?;

        Ok(Self::decision(count, count < policy.limit, policy, slot, now))
    }

    async fn try_record(
        &self,
        identifier: &str,
        endpoint: &str,
        policy: WindowPolicy,
    ) -> Result<RateLimitDecision, RateLimitError> {
        use crate::schema::rate_limit_counters::dsl;

        let mut conn = self.pool.get().await?;
        let now = Utc::now();
        let slot = window_start(now, policy.window_minutes);

        diesel::insert_into(dsl::rate_limit_counters)
            .values((
                dsl::identifier.eq(identifier),
                dsl::endpoint.eq(endpoint),
                dsl::window_start.eq(slot),
                dsl::request_count.eq(1),
            ))
            .on_conflict((dsl::identifier, dsl::endpoint, dsl::window_start))
            .do_update()
            .set(dsl::request_count.eq(dsl::request_count + 1))
            .execute(&mut conn)
            .await?;

        // Re-read the authoritative post-increment count rather than trusting
        // a returned value: not every upsert primitive surfaces the
        // post-conflict row reliably in one round trip.
        let count = Self::current_count(&mut conn, identifier, endpoint, slot).await?;

        Ok(Self::decision(count, count <= policy.limit, policy, slot, now))
    }

    async fn current_count(
        conn: &mut diesel_async::AsyncPgConnection,
        identifier: &str,
        endpoint: &str,
        slot: DateTime<Utc>,
    ) -> Result<i32, RateLimitError> {
        use crate::schema::rate_limit_counters::dsl;

        let count: Option<i32> = dsl::rate_limit_counters
            .find((identifier, endpoint, slot))
            .select(dsl::request_count)
            .first::<i32>(conn)
            .await
            .optional()?;

        // No row for the current window means zero usage.
        Ok(count.unwrap_or(0))
    }

    fn decision(
        count: i32,
        allowed: bool,
        policy: WindowPolicy,
        slot: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let reset_at = slot + Duration::minutes(policy.window_minutes);
        RateLimitDecision {
            allowed,
            limit: policy.limit,
            remaining: (policy.limit - count).max(0),
            reset_at,
            retry_after: if allowed {
                None
            } else {
                Some((reset_at - now).num_seconds().max(0))
            },
        }
    }

    /// Availability over strictness: when the store cannot be consulted the
    /// request is admitted with a full window.
    fn fail_open(policy: WindowPolicy) -> RateLimitDecision {
        let now = Utc::now();
        let slot = window_start(now, policy.window_minutes);
        RateLimitDecision {
            allowed: true,
            limit: policy.limit,
            remaining: policy.limit,
            reset_at: slot + Duration::minutes(policy.window_minutes),
            retry_after: None,
        }
    }

    /// Sweep counters past their retention horizon. An optimization only:
    /// stale rows are never consulted because lookups key on the current
    /// window boundary.
    pub async fn prune_expired(&self) -> Result<usize, RateLimitError> {
        use crate::schema::rate_limit_counters::dsl;

        let mut conn = self.pool.get().await?;
        let horizon = Utc::now() - Duration::hours(COUNTER_RETENTION_HOURS);

        let removed = diesel::delete(dsl::rate_limit_counters.filter(dsl::window_start.lt(horizon)))
            .execute(&mut conn)
            .await?;

        if removed > 0 {
            info!("Pruned {} expired rate limit counters", removed);
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_start_floors_to_slot() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 14, 37, 21).unwrap();

        let quarter = window_start(now, 15);
        assert_eq!(quarter, Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap());

        let hour = window_start(now, 60);
        assert_eq!(hour, Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap());

        let day = window_start(now, 1440);
        assert_eq!(day, Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_window_start_is_stable_within_slot() {
        let a = Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2025, 6, 2, 14, 44, 59).unwrap();
        assert_eq!(window_start(a, 15), window_start(b, 15));

        let c = Utc.with_ymd_and_hms(2025, 6, 2, 14, 45, 0).unwrap();
        assert_ne!(window_start(b, 15), window_start(c, 15));
    }

    #[test]
    fn test_identifier_prefers_user() {
        let user = Uuid::new_v4();
        let id = rate_limit_identifier(Some(user), Some("203.0.113.7"));
        assert_eq!(id, format!("user:{}", user));
    }

    #[test]
    fn test_identifier_takes_first_forwarded_address() {
        let id = rate_limit_identifier(None, Some("203.0.113.7, 10.0.0.1, 10.0.0.2"));
        assert_eq!(id, "ip:203.0.113.7");
    }

    #[test]
    fn test_identifier_without_forwarding_info() {
        assert_eq!(rate_limit_identifier(None, None), "ip:unknown");
        assert_eq!(rate_limit_identifier(None, Some("  ")), "ip:unknown");
    }

    #[test]
    fn test_decision_metadata() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 14, 37, 0).unwrap();
        let slot = window_start(now, 15);
        let policy = WindowPolicy { limit: 5, window_minutes: 15 };

        let allowed = RateLimitService::decision(3, true, policy, slot, now);
        assert!(allowed.allowed);
        assert_eq!(allowed.remaining, 2);
        assert_eq!(allowed.retry_after, None);

        let denied = RateLimitService::decision(5, false, policy, slot, now);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        // 14:37 -> window resets at 14:45
        assert_eq!(denied.retry_after, Some(8 * 60));
    }

    #[test]
    fn test_decision_headers() {
        let now = Utc::now();
        let policy = WindowPolicy { limit: 10, window_minutes: 60 };
        let decision =
            RateLimitService::decision(10, false, policy, window_start(now, 60), now);

        let headers = decision.headers();
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "10");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
        assert!(headers.contains_key("retry-after"));
    }
}
