// Quota Engine
// Atomic check-and-decrement over the per-user quota row. All counter
// mutations go through here so the free-before-bonus precedence and the pro
// bypass hold everywhere. Concurrency control is the database's: every
// read-modify-write takes a row-level lock on the single user's row, so
// requests for different users never contend.
//
// The daily allowance is self-healing: reset eligibility is recomputed from
// `last_creation_reset` on every read, so no scheduler has to fire at
// midnight for the cap to roll over.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DieselPool;
use crate::models::profile::Profile;
use crate::models::quota::{QuotaSnapshot, UserQuota};

/// Save-slot allowance granted to every new account.
pub const DEFAULT_SAVE_SLOTS: i32 = 10;

/// Free creation allowance granted per UTC day.
pub const DEFAULT_DAILY_CREATIONS: i32 = 10;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for QuotaError {
    fn from(e: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        QuotaError::Pool(e.to_string())
    }
}

/// Whether the daily allowance must be recomputed: true exactly when the
/// stored reset instant falls on an earlier UTC calendar date than `now`.
pub fn should_reset(last_reset: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    last_reset.date_naive() < now.date_naive()
}

/// Free-before-bonus precedence: consume the daily allowance first, spilling
/// into purchased credits only once it is exhausted. Returns the new
/// `(daily, bonus)` pair, or None when the combined balance cannot cover
/// `amount` (in which case nothing may be mutated).
pub fn split_creation_debit(daily: i32, bonus: i32, amount: i32) -> Option<(i32, i32)> {
    if amount < 0 {
        return None;
    }
    if (daily as i64) + (bonus as i64) < amount as i64 {
        return None;
    }
    let from_daily = daily.min(amount);
    Some((daily - from_daily, bonus - (amount - from_daily)))
}

/// Quota Engine over the ledger store. Fails closed: a store error is never
/// treated as available quota.
pub struct QuotaService {
    pool: DieselPool,
}

impl QuotaService {
    pub fn new(pool: DieselPool) -> Self {
        Self { pool }
    }

    /// Fetch the user's quota, creating the row with defaults on first access
    /// and applying the daily reset when the stored reset date is stale.
    #[instrument(skip(self))]
    pub async fn get_or_init_quota(&self, user_id: Uuid) -> Result<QuotaSnapshot, QuotaError> {
        let mut conn = self.pool.get().await?;
        let quota = Self::get_or_init_on(&mut conn, user_id).await?;
        let plan = Profile::plan_for(&mut conn, user_id).await?;
        Ok(quota.snapshot(plan.is_pro()))
    }

    /// Same as `get_or_init_quota` but on a caller-supplied connection and
    /// without the plan lookup. Used by other ledger operations that need the
    /// row to exist before locking it.
    pub async fn get_or_init_on(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<UserQuota, QuotaError> {
        Profile::ensure_exists(conn, user_id).await?;
        UserQuota::insert_default(conn, user_id).await?;

        let quota = UserQuota::find_by_user(conn, user_id)
            .await?
            .ok_or(diesel::result::Error::NotFound)?;

        if !should_reset(quota.last_creation_reset, Utc::now()) {
            return Ok(quota);
        }

        Self::apply_daily_reset(conn, user_id).await
    }

    /// Roll the daily allowance over under a row lock. The eligibility check
    /// is repeated after the lock is acquired so that many requests racing
    /// across a midnight boundary reset the counter exactly once.
    async fn apply_daily_reset(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<UserQuota, QuotaError> {
        use crate::schema::user_quotas::dsl;

        conn.transaction::<UserQuota, QuotaError, _>(|conn| {
            async move {
                let locked = UserQuota::find_for_update(conn, user_id).await?;
                let now = Utc::now();

                if !should_reset(locked.last_creation_reset, now) {
                    // Another request already rolled the day over.
                    return Ok(locked);
                }

                let updated = diesel::update(dsl::user_quotas.find(user_id))
                    .set((
                        dsl::creations_remaining_today.eq(DEFAULT_DAILY_CREATIONS),
                        dsl::last_creation_reset.eq(now),
                        dsl::updated_at.eq(now),
                    ))
                    .get_result::<UserQuota>(conn)
                    .await?;

                info!(user_id = %user_id, "Daily creation allowance reset");
                Ok(updated)
            }
            .scope_boxed()
        })
        .await
    }

    /// Consume `amount` units of creation allowance. Pro plans always succeed
    /// without touching counters. Returns Ok(false) when the combined free +
    /// bonus balance is insufficient; nothing is mutated in that case.
    #[instrument(skip(self))]
    pub async fn decrement_creation_quota(
        &self,
        user_id: Uuid,
        amount: i32,
    ) -> Result<bool, QuotaError> {
        use crate::schema::user_quotas::dsl;

        if amount <= 0 {
            return Ok(true);
        }

        let mut conn = self.pool.get().await?;

        if Profile::plan_for(&mut conn, user_id).await?.is_pro() {
            return Ok(true);
        }

        Self::get_or_init_on(&mut conn, user_id).await?;

        conn.transaction::<bool, QuotaError, _>(|conn| {
            async move {
                let locked = UserQuota::find_for_update(conn, user_id).await?;
                let now = Utc::now();

                // The day can roll over between the init read and taking the
                // lock; recompute under the lock so the reset applies once.
                let (daily, last_reset) = if should_reset(locked.last_creation_reset, now) {
                    (DEFAULT_DAILY_CREATIONS, now)
                } else {
                    (locked.creations_remaining_today, locked.last_creation_reset)
                };

                match split_creation_debit(daily, locked.bonus_creations_remaining, amount) {
                    None => Ok(false),
                    Some((new_daily, new_bonus)) => {
                        diesel::update(dsl::user_quotas.find(user_id))
                            .set((
                                dsl::creations_remaining_today.eq(new_daily),
                                dsl::bonus_creations_remaining.eq(new_bonus),
                                dsl::last_creation_reset.eq(last_reset),
                                dsl::updated_at.eq(now),
                            ))
                            .execute(conn)
                            .await?;
                        Ok(true)
                    },
                }
            }
            .scope_boxed()
        })
        .await
    }

    /// Consume save slots. Single pool, no daily/bonus split. Pro bypasses.
    #[instrument(skip(self))]
    pub async fn decrement_save_slots(
        &self,
        user_id: Uuid,
        amount: i32,
    ) -> Result<bool, QuotaError> {
        if amount <= 0 {
            return Ok(true);
        }

        let mut conn = self.pool.get().await?;

        if Profile::plan_for(&mut conn, user_id).await?.is_pro() {
            return Ok(true);
        }

        Self::get_or_init_on(&mut conn, user_id).await?;

        conn.transaction::<bool, QuotaError, _>(|conn| {
            async move { Self::consume_save_slots_on(conn, user_id, amount).await }.scope_boxed()
        })
        .await
    }

    /// Row-locked save-slot debit on a caller-owned transaction, so a handler
    /// can make "insert listing + consume slot" atomic. The caller is
    /// responsible for the pro-plan bypass and for running inside a
    /// transaction.
    pub async fn consume_save_slots_on(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        amount: i32,
    ) -> Result<bool, QuotaError> {
        use crate::schema::user_quotas::dsl;

        let locked = UserQuota::find_for_update(conn, user_id).await?;
        if locked.save_slots_remaining < amount {
            return Ok(false);
        }

        diesel::update(dsl::user_quotas.find(user_id))
            .set((
                dsl::save_slots_remaining.eq(locked.save_slots_remaining - amount),
                dsl::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await?;

        Ok(true)
    }
}
