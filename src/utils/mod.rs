// Utility modules for SnapList Backend

pub mod service_error;
pub mod validation;

pub use service_error::ApiError;
pub use validation::{trim_and_validate_field, trim_optional_field};
