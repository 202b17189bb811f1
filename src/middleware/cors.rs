// CORS layer built from the configured origin whitelist. A wildcard entry
// outside production opens the layer up for local frontends.

use axum::http::{header, HeaderValue, Method};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

pub fn cors_layer() -> CorsLayer {
    let config = crate::app_config::config();

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let has_wildcard = config.cors_allowed_origins.iter().any(|o| o == "*");

    if has_wildcard && !config.is_production() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring unparseable CORS origin: {}", o);
                None
            },
        })
        .collect();

    layer.allow_origin(origins)
}
