// Listing CRUD handlers
// Row-ownership data access. The only quota-aware path is saving: the insert
// and the save-slot debit share one transaction so a failed insert can never
// burn a slot and a spent slot always has a listing behind it.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::AsyncConnection;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    models::listing::{CreateListingRequest, ListListingsParams, Listing, ListingResponse, NewListing},
    models::profile::Profile,
    models::quota::UserQuota,
    services::quota::QuotaService,
    utils::service_error::ApiError,
    utils::validation::trim_optional_field,
};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Save a listing (consumes one save slot)
/// POST /api/v1/listings
#[utoipa::path(
    post,
    path = "/v1/listings",
    tag = "Listings",
    operation_id = "saveListing",
    request_body = CreateListingRequest,
    responses(
        (status = 201, description = "Listing saved", body = ListingResponse),
        (status = 400, description = "Bad request - validation failed"),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "No save slots remaining")
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn save_listing(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateListingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.validate()?;

    let user_id = user.user_id;
    let mut conn = state.diesel_pool.get().await?;

    let is_pro = Profile::plan_for(&mut conn, user_id).await?.is_pro();
    if is_pro {
        // Pro skips metering but still needs the profile row for the FK.
        Profile::ensure_exists(&mut conn, user_id).await?;
    } else {
        QuotaService::get_or_init_on(&mut conn, user_id).await?;
    }

    let new_listing = NewListing {
        user_id,
        title: request.title.trim().to_string(),
        description: request.description.trim().to_string(),
        condition: request.condition.trim().to_string(),
        price_cents: request.price_cents,
        location: trim_optional_field(request.location.as_ref()),
        image_path: request.image_path,
    };

    let saved = conn
        .transaction::<Option<Listing>, ApiError, _>(|conn| {
            async move {
                if !is_pro {
                    let consumed = QuotaService::consume_save_slots_on(conn, user_id, 1).await?;
                    if !consumed {
                        return Ok(None);
                    }
                }
                let listing = Listing::insert(conn, &new_listing).await?;
                Ok(Some(listing))
            }
            .scope_boxed()
        })
        .await?;

    let listing = saved.ok_or(ApiError::SaveQuotaExceeded)?;

    let slots_remaining = UserQuota::find_by_user(&mut conn, user_id)
        .await?
        .map(|q| q.save_slots_remaining);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "listing": ListingResponse::from(listing),
            "save_slots_remaining": slots_remaining,
        })),
    ))
}

/// List own listings
/// GET /api/v1/listings
#[utoipa::path(
    get,
    path = "/v1/listings",
    tag = "Listings",
    operation_id = "listListings",
    responses(
        (status = 200, description = "Listings retrieved"),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn list_listings(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<ListListingsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let mut conn = state.diesel_pool.get().await?;
    let listings =
        Listing::list_for_user(&mut conn, user.user_id, per_page, (page - 1) * per_page).await?;

    Ok(Json(json!({
        "listings": listings.into_iter().map(ListingResponse::from).collect::<Vec<_>>(),
        "page": page,
        "per_page": per_page,
    })))
}

/// Fetch a single owned listing
/// GET /api/v1/listings/{id}
#[utoipa::path(
    get,
    path = "/v1/listings/{id}",
    tag = "Listings",
    operation_id = "getListing",
    params(
        ("id" = Uuid, Path, description = "Listing ID")
    ),
    responses(
        (status = 200, description = "Listing retrieved", body = ListingResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Listing not found")
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn get_listing(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(listing_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut conn = state.diesel_pool.get().await?;

    let listing = Listing::find_owned(&mut conn, listing_id, user.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(ListingResponse::from(listing)))
}

/// Delete an owned listing. Slots are not refunded: the allowance meters
/// consumption, not concurrent holdings.
/// DELETE /api/v1/listings/{id}
#[utoipa::path(
    delete,
    path = "/v1/listings/{id}",
    tag = "Listings",
    operation_id = "deleteListing",
    params(
        ("id" = Uuid, Path, description = "Listing ID")
    ),
    responses(
        (status = 204, description = "Listing deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Listing not found")
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub async fn delete_listing(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(listing_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let mut conn = state.diesel_pool.get().await?;

    if Listing::delete_owned(&mut conn, listing_id, user.user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}
