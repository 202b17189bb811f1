// Library exports for SnapList Backend
// This file exposes modules and functions for library consumers

pub mod app;
pub mod app_config;
pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod schema;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use app::AppState;
pub use app_config::{AppConfig, CONFIG};
pub use config::{RateLimitingConfig, WindowPolicy};
pub use db::{create_diesel_pool, DieselDatabaseConfig, DieselPool};
pub use middleware::{auth_middleware, AuthenticatedUser, MaybeUser};
pub use models::quota::QuotaSnapshot;
pub use services::{
    rate_limit_identifier, should_reset, split_creation_debit, window_start, CheckoutInitiation,
    HttpObjectStore, HttpPaymentClient, OpenAiVisionClient, PackGrant, PurchaseError,
    PurchaseService, QuotaError, QuotaService, RateLimitDecision, RateLimitError,
    RateLimitService,
};
pub use utils::ApiError;

use std::sync::Arc;
use tracing::info;

// Library initialization function for external consumers and the binary
pub async fn initialize_app_state() -> Result<AppState, Box<dyn std::error::Error>> {
    // Load environment
    dotenv::dotenv().ok();

    // Initialize config
    let config = app_config::config();

    // Initialize database pool
    info!("Initializing database pool...");
    info!(
        "Database: {}",
        db::mask_connection_string(&config.database_url)
    );
    let db_config = db::DieselDatabaseConfig::default();
    let max_connections = db_config.max_connections;
    let diesel_pool = db::create_diesel_pool(db_config).await?;

    // Run migrations if enabled
    if migrations::should_run_migrations() {
        info!("Running embedded migrations...");
        let migration_config = migrations::MigrationConfig::default();
        migrations::run_all_migrations(&diesel_pool, migration_config)
            .await
            .map_err(|e| format!("Migration failed: {}", e))?;
    }

    // Initialize services
    let rate_limit_config = Arc::new(RateLimitingConfig::from_env());
    rate_limit_config
        .validate()
        .map_err(|e| format!("Invalid rate limit configuration: {}", e))?;

    let quota_service = Arc::new(QuotaService::new(diesel_pool.clone()));
    let rate_limit_service = Arc::new(RateLimitService::new(diesel_pool.clone()));

    let payments = Arc::new(HttpPaymentClient::new(&config.payments)?);
    let purchase_service = Arc::new(PurchaseService::new(
        diesel_pool.clone(),
        payments.clone(),
    ));

    let vision: Arc<dyn services::VisionProvider> =
        Arc::new(OpenAiVisionClient::new(&config.vision)?);
    let storage: Arc<dyn services::ObjectStorage> =
        Arc::new(HttpObjectStore::new(&config.storage)?);

    Ok(AppState {
        config: Arc::new(config.clone()),
        diesel_pool,
        quota_service,
        purchase_service,
        rate_limit_service,
        rate_limit_config,
        vision,
        storage,
        payments,
        max_connections,
    })
}

/// Assemble the full router with middleware layers applied
pub fn build_router(state: AppState) -> axum::Router {
    use axum::routing::get;
    use tower_http::trace::TraceLayer;

    let api = handlers::public_routes().merge(
        handlers::protected_routes()
            .layer(axum::middleware::from_fn(middleware::auth_middleware)),
    );

    axum::Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api)
        .layer(middleware::cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Health check handler
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl axum::response::IntoResponse {
    use axum::http::StatusCode;
    use axum::Json;

    let timestamp = chrono::Utc::now().to_rfc3339();

    let (overall_healthy, postgres_health) = match db::check_diesel_health(&state.diesel_pool).await
    {
        Ok(_) => (
            true,
            serde_json::json!({
                "status": "healthy",
                "max_connections": state.max_connections,
                "error": null
            }),
        ),
        Err(e) => (
            false,
            serde_json::json!({
                "status": "unhealthy",
                "error": format!("Database connection failed: {}", e)
            }),
        ),
    };

    let response = serde_json::json!({
        "status": if overall_healthy { "healthy" } else { "degraded" },
        "service": "snaplist-backend",
        "timestamp": timestamp,
        "components": {
            "postgresql": postgres_health
        }
    });

    if overall_healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}
