// Common test utilities and helpers
// Integration tests run against a live PostgreSQL reachable via DATABASE_URL;
// embedded migrations are applied on first pool setup. Every test works on a
// fresh random user or identifier, so tests for different subjects do not
// interfere.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use snaplist_backend_core::db::{create_diesel_pool, DieselDatabaseConfig, DieselPool};
use snaplist_backend_core::migrations::{run_all_migrations, MigrationConfig};
use snaplist_backend_core::schema::{profiles, user_quotas};

/// Build a pool against DATABASE_URL and make sure the schema is current.
pub async fn setup_pool() -> DieselPool {
    dotenv::from_filename(".env.test").ok();
    dotenv::dotenv().ok();

    let config = DieselDatabaseConfig::default();
    let pool = create_diesel_pool(config)
        .await
        .expect("Failed to create test pool; is DATABASE_URL set and PostgreSQL running?");

    run_all_migrations(&pool, MigrationConfig::default())
        .await
        .expect("Failed to run migrations");

    pool
}

/// A brand-new user id; nothing exists for it until a test touches the ledger.
pub fn fresh_user() -> Uuid {
    Uuid::new_v4()
}

/// A unique rate-limit identifier so window tests never share counters.
pub fn fresh_identifier() -> String {
    format!("ip:test-{}", Uuid::new_v4().simple())
}

/// Create (or re-plan) the profile row for a user.
pub async fn set_plan(pool: &DieselPool, user_id: Uuid, plan: &str) {
    let mut conn = pool.get().await.expect("pool");

    diesel::insert_into(profiles::table)
        .values((profiles::id.eq(user_id), profiles::plan.eq(plan)))
        .on_conflict(profiles::id)
        .do_update()
        .set(profiles::plan.eq(plan))
        .execute(&mut conn)
        .await
        .expect("set plan");
}

/// Force the quota counters into a known state. Test-only backdoor; the
/// production code path always goes through QuotaService.
pub async fn force_quota(
    pool: &DieselPool,
    user_id: Uuid,
    saves: i32,
    daily: i32,
    bonus: i32,
) {
    let mut conn = pool.get().await.expect("pool");

    diesel::update(user_quotas::table.find(user_id))
        .set((
            user_quotas::save_slots_remaining.eq(saves),
            user_quotas::creations_remaining_today.eq(daily),
            user_quotas::bonus_creations_remaining.eq(bonus),
        ))
        .execute(&mut conn)
        .await
        .expect("force quota");
}

/// Backdate the last reset instant, as if the row had not been touched since
/// `days_ago` days.
pub async fn backdate_last_reset(pool: &DieselPool, user_id: Uuid, days_ago: i64) {
    let mut conn = pool.get().await.expect("pool");
    let then = chrono::Utc::now() - chrono::Duration::days(days_ago);

    diesel::update(user_quotas::table.find(user_id))
        .set(user_quotas::last_creation_reset.eq(then))
        .execute(&mut conn)
        .await
        .expect("backdate last reset");
}
