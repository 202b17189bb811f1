// Listing Database Model
// Plain row-ownership CRUD. Saving a listing is what consumes a save slot;
// the listing rows themselves carry no quota logic.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::schema::listings;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = listings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Listing {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub condition: String,
    pub price_cents: Option<i32>,
    pub location: Option<String>,
    pub image_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = listings)]
pub struct NewListing {
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub condition: String,
    pub price_cents: Option<i32>,
    pub location: Option<String>,
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateListingRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    #[validate(length(min = 1, max = 5000, message = "Description must be 1-5000 characters"))]
    pub description: String,

    #[validate(length(min = 1, max = 50, message = "Condition must be 1-50 characters"))]
    pub condition: String,

    #[validate(range(min = 0, message = "Price cannot be negative"))]
    pub price_cents: Option<i32>,

    #[validate(length(max = 120, message = "Location must be at most 120 characters"))]
    pub location: Option<String>,

    pub image_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListListingsParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ListingResponse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub condition: String,
    pub price_cents: Option<i32>,
    pub location: Option<String>,
    pub image_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Listing> for ListingResponse {
    fn from(l: Listing) -> Self {
        Self {
            id: l.id,
            title: l.title,
            description: l.description,
            condition: l.condition,
            price_cents: l.price_cents,
            location: l.location,
            image_path: l.image_path,
            created_at: l.created_at,
        }
    }
}

impl Listing {
    pub async fn insert(
        conn: &mut AsyncPgConnection,
        new: &NewListing,
    ) -> Result<Self, diesel::result::Error> {
        diesel::insert_into(listings::table)
            .values(new)
            .get_result::<Self>(conn)
            .await
    }

    pub async fn find_owned(
        conn: &mut AsyncPgConnection,
        listing_id: Uuid,
        owner: Uuid,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::listings::dsl;

        dsl::listings
            .find(listing_id)
            .filter(dsl::user_id.eq(owner))
            .first::<Self>(conn)
            .await
            .optional()
    }

    pub async fn list_for_user(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        use crate::schema::listings::dsl;

        dsl::listings
            .filter(dsl::user_id.eq(owner))
            .order(dsl::created_at.desc())
            .limit(limit)
            .offset(offset)
            .load::<Self>(conn)
            .await
    }

    /// Delete with the ownership check folded into the predicate; returns
    /// whether a row was actually removed.
    pub async fn delete_owned(
        conn: &mut AsyncPgConnection,
        listing_id: Uuid,
        owner: Uuid,
    ) -> Result<bool, diesel::result::Error> {
        use crate::schema::listings::dsl;

        let deleted = diesel::delete(
            dsl::listings
                .find(listing_id)
                .filter(dsl::user_id.eq(owner)),
        )
        .execute(conn)
        .await?;

        Ok(deleted > 0)
    }
}
