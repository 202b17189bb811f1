// Middleware modules for SnapList Backend

pub mod auth;
pub mod cors;

pub use auth::{auth_middleware, verify_bearer, AuthenticatedUser, MaybeUser};
pub use cors::cors_layer;
