// Runtime-tunable policy configuration
pub mod rate_limit;

pub use rate_limit::{RateLimitingConfig, WindowPolicy};
