// Background task scheduler
// Periodic maintenance only; nothing here is correctness-bearing. The rate
// limit sweep is an optimization - stale counters are never consulted because
// lookups key on the current window boundary.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::services::rate_limit::RateLimitService;

const COUNTER_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Spawn the hourly rate-limit counter sweep.
pub fn initialize_background_tasks(rate_limit_service: Arc<RateLimitService>) {
    info!("Starting background tasks");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(COUNTER_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(e) = rate_limit_service.prune_expired().await {
                warn!("Rate limit counter sweep failed: {}", e);
            }
        }
    });
}
