// UserQuota Database Model
// One row per user holding the freemium counters. All mutation goes through
// QuotaService so the free-before-bonus precedence and the pro bypass cannot
// be sidestepped by ad-hoc updates.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::schema::user_quotas;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = user_quotas)]
#[diesel(primary_key(user_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserQuota {
    pub user_id: Uuid,
    pub save_slots_remaining: i32,
    pub creations_remaining_today: i32,
    pub bonus_creations_remaining: i32,
    pub last_creation_reset: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time view of a user's allowances, with the plan override already
/// resolved. This is what handlers shape into `{used, limit, remaining}`
/// blocks.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuotaSnapshot {
    pub save_slots_remaining: i32,
    pub creations_remaining_today: i32,
    pub bonus_creations_remaining: i32,
    pub last_creation_reset: DateTime<Utc>,
    pub is_pro: bool,
}

impl QuotaSnapshot {
    /// Total creation allowance available right now (free + purchased).
    pub fn total_creations_remaining(&self) -> i64 {
        self.creations_remaining_today as i64 + self.bonus_creations_remaining as i64
    }
}

impl UserQuota {
    pub fn snapshot(&self, is_pro: bool) -> QuotaSnapshot {
        QuotaSnapshot {
            save_slots_remaining: self.save_slots_remaining,
            creations_remaining_today: self.creations_remaining_today,
            bonus_creations_remaining: self.bonus_creations_remaining,
            last_creation_reset: self.last_creation_reset,
            is_pro,
        }
    }

    pub async fn find_by_user(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::user_quotas::dsl;

        dsl::user_quotas
            .find(user_id)
            .first::<Self>(conn)
            .await
            .optional()
    }

    /// Load the quota row under a row-level lock. Must be called inside a
    /// transaction; the lock is what serializes concurrent decrements for the
    /// same user.
    pub async fn find_for_update(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<Self, diesel::result::Error> {
        use crate::schema::user_quotas::dsl;

        dsl::user_quotas
            .find(user_id)
            .for_update()
            .first::<Self>(conn)
            .await
    }

    /// Insert the default row for a user if none exists. Column defaults come
    /// from the migration; concurrent initializers coalesce on the key.
    pub async fn insert_default(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<(), diesel::result::Error> {
        use crate::schema::user_quotas::dsl;

        diesel::insert_into(dsl::user_quotas)
            .values(dsl::user_id.eq(user_id))
            .on_conflict(dsl::user_id)
            .do_nothing()
            .execute(conn)
            .await?;

        Ok(())
    }
}
