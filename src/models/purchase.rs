// Purchase Ledger Model
// Append-mostly record of payment attempts. The unique idempotency_key is the
// store-level backstop that turns duplicate webhook deliveries and
// lookup-then-insert races into detectable conflicts.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::schema::purchases;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = purchases)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Purchase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sku: Option<String>,
    pub amount_cents: i32,
    pub status: String,
    pub idempotency_key: String,
    pub provider_session_id: Option<String>,
    pub metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = purchases)]
pub struct NewPurchase {
    pub user_id: Uuid,
    pub sku: Option<String>,
    pub amount_cents: i32,
    pub status: String,
    pub idempotency_key: String,
    pub provider_session_id: Option<String>,
    pub metadata: Option<JsonValue>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PurchaseStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::Failed => "failed",
            PurchaseStatus::Refunded => "refunded",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PurchaseStatus::Pending),
            "completed" => Some(PurchaseStatus::Completed),
            "failed" => Some(PurchaseStatus::Failed),
            "refunded" => Some(PurchaseStatus::Refunded),
            _ => None,
        }
    }
}

/// Purchase history entry returned by GET /purchases.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PurchaseResponse {
    pub id: Uuid,
    pub sku: Option<String>,
    pub amount_cents: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Purchase> for PurchaseResponse {
    fn from(p: Purchase) -> Self {
        Self {
            id: p.id,
            sku: p.sku,
            amount_cents: p.amount_cents,
            status: p.status,
            created_at: p.created_at,
            completed_at: p.completed_at,
        }
    }
}

impl Purchase {
    pub fn is_completed(&self) -> bool {
        self.status == PurchaseStatus::Completed.as_str()
    }

    pub async fn find_by_idempotency_key(
        conn: &mut AsyncPgConnection,
        key: &str,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::purchases::dsl;

        dsl::purchases
            .filter(dsl::idempotency_key.eq(key))
            .first::<Self>(conn)
            .await
            .optional()
    }

    /// Same lookup, but locking the row so a concurrent reconciler for the
    /// same key serializes behind us. Must run inside a transaction.
    pub async fn find_by_idempotency_key_for_update(
        conn: &mut AsyncPgConnection,
        key: &str,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::purchases::dsl;

        dsl::purchases
            .filter(dsl::idempotency_key.eq(key))
            .for_update()
            .first::<Self>(conn)
            .await
            .optional()
    }

    pub async fn find_by_provider_session(
        conn: &mut AsyncPgConnection,
        session_id: &str,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::purchases::dsl;

        dsl::purchases
            .filter(dsl::provider_session_id.eq(session_id))
            .first::<Self>(conn)
            .await
            .optional()
    }

    pub async fn find_by_user(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        use crate::schema::purchases::dsl;

        dsl::purchases
            .filter(dsl::user_id.eq(user_id))
            .order(dsl::created_at.desc())
            .load::<Self>(conn)
            .await
    }

    pub async fn insert(
        conn: &mut AsyncPgConnection,
        new: &NewPurchase,
    ) -> Result<Self, diesel::result::Error> {
        diesel::insert_into(purchases::table)
            .values(new)
            .get_result::<Self>(conn)
            .await
    }
}
