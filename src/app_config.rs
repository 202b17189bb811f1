// Centralized configuration management for SnapList Backend
// Load ALL env vars ONCE at startup; everything downstream reads the frozen
// CONFIG snapshot.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Global application configuration loaded once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    // For tests, load .env file first
    #[cfg(test)]
    dotenv::dotenv().ok();

    AppConfig::from_env().expect("Failed to load configuration")
});

/// Access the global configuration
pub fn config() -> &'static AppConfig {
    &CONFIG
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // Server
    pub bind_address: String,
    pub port: u16,
    pub environment: Environment,
    pub rust_log: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_min_connections: u32,
    pub database_connect_timeout: u64,
    pub database_idle_timeout: u64,
    pub database_max_lifetime: u64,

    // Security
    pub cors_allowed_origins: Vec<String>,

    // Features
    pub disable_embedded_migrations: bool,

    // Collaborator boundaries
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub vision: VisionConfig,
    pub payments: PaymentConfig,
}

/// Environment type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Environment {
    Development,
    Test,
    Staging,
    Production,
}

impl From<String> for Environment {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            "test" => Environment::Test,
            "staging" | "stage" => Environment::Staging,
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Bearer-token verification settings. Tokens are minted by the external
/// auth provider; this service only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
}

/// Object storage provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub base_url: String,
    pub bucket: String,
    pub api_key: String,
    pub signed_url_ttl_secs: u64,
    pub timeout_secs: u64,
}

/// Vision model provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_output_tokens: u32,
}

/// Payment provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    pub api_url: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub success_url: String,
    pub cancel_url: String,
    pub timeout_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), v)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment =
            Environment::from(env_or("ENVIRONMENT", "development"));

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let auth = AuthConfig {
            jwt_secret: env_or("AUTH_JWT_SECRET", "dev-secret-change-me"),
            jwt_issuer: env_or("AUTH_JWT_ISSUER", "snaplist-auth"),
            jwt_audience: env_or("AUTH_JWT_AUDIENCE", "snaplist-api"),
        };

        let storage = StorageConfig {
            base_url: env_or("STORAGE_URL", "http://localhost:5400/storage/v1"),
            bucket: env_or("STORAGE_BUCKET", "listing-images"),
            api_key: env_or("STORAGE_API_KEY", ""),
            signed_url_ttl_secs: env_parse("STORAGE_SIGNED_URL_TTL", 3600)?,
            timeout_secs: env_parse("STORAGE_TIMEOUT_SECS", 30)?,
        };

        let vision = VisionConfig {
            api_url: env_or("VISION_API_URL", "https://api.openai.com"),
            api_key: env_or("VISION_API_KEY", ""),
            model: env_or("VISION_MODEL", "gpt-4o-mini"),
            timeout_secs: env_parse("VISION_TIMEOUT_SECS", 45)?,
            max_output_tokens: env_parse("VISION_MAX_OUTPUT_TOKENS", 500)?,
        };

        let payments = PaymentConfig {
            api_url: env_or("PAYMENT_API_URL", "https://api.stripe.com"),
            secret_key: env_or("PAYMENT_SECRET_KEY", ""),
            webhook_secret: env_or("PAYMENT_WEBHOOK_SECRET", "whsec_dev"),
            success_url: env_or(
                "CHECKOUT_SUCCESS_URL",
                "http://localhost:3000/purchase/success",
            ),
            cancel_url: env_or(
                "CHECKOUT_CANCEL_URL",
                "http://localhost:3000/purchase/cancel",
            ),
            timeout_secs: env_parse("PAYMENT_TIMEOUT_SECS", 30)?,
        };

        let config = Self {
            bind_address: env_or("BIND_ADDRESS", "0.0.0.0"),
            port: env_parse("PORT", 8080)?,
            environment,
            rust_log: env_or("RUST_LOG", "snaplist_backend_core=debug,tower_http=info"),

            database_url,
            database_max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 20)?,
            database_min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2)?,
            database_connect_timeout: env_parse("DATABASE_CONNECT_TIMEOUT", 10)?,
            database_idle_timeout: env_parse("DATABASE_IDLE_TIMEOUT", 600)?,
            database_max_lifetime: env_parse("DATABASE_MAX_LIFETIME", 1800)?,

            cors_allowed_origins: env_or("CORS_ALLOWED_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            disable_embedded_migrations: env_parse("DISABLE_EMBEDDED_MIGRATIONS", false)?,

            auth,
            storage,
            vision,
            payments,
        };

        config.warn_on_dev_secrets();
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    fn warn_on_dev_secrets(&self) {
        if !self.is_production() {
            return;
        }
        if self.auth.jwt_secret == "dev-secret-change-me" {
            warn!("AUTH_JWT_SECRET is the development default in production");
        }
        if self.payments.webhook_secret == "whsec_dev" {
            warn!("PAYMENT_WEBHOOK_SECRET is the development default in production");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::from("prod".to_string()), Environment::Production);
        assert_eq!(Environment::from("DEV".to_string()), Environment::Development);
        assert_eq!(Environment::from("unknown".to_string()), Environment::Development);
        assert_eq!(Environment::Production.to_string(), "production");
    }
}
