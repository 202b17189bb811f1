// Credit Pack Catalog Model
// Read-mostly catalog seeded by migration. Offers are retired by flipping
// is_active, never deleted, so historical purchases keep their FK.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::schema::credit_packs;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = credit_packs)]
#[diesel(primary_key(sku))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreditPack {
    pub sku: String,
    pub display_name: String,
    pub adds_creations: i32,
    pub adds_saves: i32,
    pub price_cents: i32,
    pub provider_price_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Public catalog entry returned by GET /packs.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PackResponse {
    pub sku: String,
    pub display_name: String,
    pub adds_creations: i32,
    pub adds_saves: i32,
    pub price_cents: i32,
}

impl From<CreditPack> for PackResponse {
    fn from(pack: CreditPack) -> Self {
        Self {
            sku: pack.sku,
            display_name: pack.display_name,
            adds_creations: pack.adds_creations,
            adds_saves: pack.adds_saves,
            price_cents: pack.price_cents,
        }
    }
}

impl CreditPack {
    pub async fn list_active(
        conn: &mut AsyncPgConnection,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        use crate::schema::credit_packs::dsl;

        dsl::credit_packs
            .filter(dsl::is_active.eq(true))
            .order(dsl::price_cents.asc())
            .load::<Self>(conn)
            .await
    }

    /// Look up a purchasable pack. Inactive packs are invisible here: a
    /// retired offer can no longer be bought or credited.
    pub async fn find_active_by_sku(
        conn: &mut AsyncPgConnection,
        sku: &str,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::credit_packs::dsl;

        dsl::credit_packs
            .filter(dsl::sku.eq(sku))
            .filter(dsl::is_active.eq(true))
            .first::<Self>(conn)
            .await
            .optional()
    }
}
