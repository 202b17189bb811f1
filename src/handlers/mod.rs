// HTTP handlers: thin composition of the quota/ledger services with the
// external collaborators. Business logic lives in services/.

pub mod analyze;
pub mod listings;
pub mod purchases;
pub mod quota;
pub mod webhooks;

use crate::app::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

// Public routes: anonymous analyze (IP-capped), catalog, webhooks
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/listings/analyze",
            post(analyze::analyze_listing_image)
                // Image uploads outgrow the default body limit
                .layer(DefaultBodyLimit::max(12 * 1024 * 1024)),
        )
        .route("/packs", get(purchases::list_packs))
        .route("/webhooks/payment", post(webhooks::payment_webhook))
}

// Routes requiring a verified identity
pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/listings",
            post(listings::save_listing).get(listings::list_listings),
        )
        .route(
            "/listings/{id}",
            get(listings::get_listing).delete(listings::delete_listing),
        )
        .route("/quota", get(quota::get_quota))
        .route("/purchases", get(purchases::list_purchases))
        .route("/purchases/checkout", post(purchases::create_checkout))
}
