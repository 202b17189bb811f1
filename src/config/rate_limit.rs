// Centralized rate-limit window policies
// Every gated endpoint composes from these windows; limits are env-tunable
// for self-hosted deployments.

use serde::{Deserialize, Serialize};

/// A fixed counting window: at most `limit` counted events per
/// `window_minutes`-sized slot. Window boundaries are a deterministic floor
/// of wall-clock time, so concurrent counters for the same slot coalesce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowPolicy {
    pub limit: i32,
    pub window_minutes: i64,
}

/// Window policies for the analyze path and general API abuse prevention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Short abuse window applied to everyone.
    pub burst: WindowPolicy,

    /// Medium window for unauthenticated callers.
    pub sustained_anonymous: WindowPolicy,

    /// Medium window for authenticated callers.
    pub sustained_authenticated: WindowPolicy,

    /// Anonymous daily creation cap (business quota, not abuse prevention):
    /// checked first because it is the most user-visible constraint.
    pub anonymous_daily: WindowPolicy,
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            burst: WindowPolicy {
                limit: env_parse("RATE_LIMIT_BURST_MAX", 5),
                window_minutes: env_parse("RATE_LIMIT_BURST_WINDOW_MINUTES", 15),
            },
            sustained_anonymous: WindowPolicy {
                limit: env_parse("RATE_LIMIT_ANON_MAX", 10),
                window_minutes: env_parse("RATE_LIMIT_SUSTAINED_WINDOW_MINUTES", 60),
            },
            sustained_authenticated: WindowPolicy {
                limit: env_parse("RATE_LIMIT_AUTH_MAX", 50),
                window_minutes: env_parse("RATE_LIMIT_SUSTAINED_WINDOW_MINUTES", 60),
            },
            anonymous_daily: WindowPolicy {
                limit: env_parse("ANONYMOUS_DAILY_CREATION_LIMIT", 10),
                window_minutes: 1440,
            },
        }
    }
}

impl RateLimitingConfig {
    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Self {
        Self::default()
    }

    /// The sustained window applicable to a request.
    pub fn sustained_for(&self, authenticated: bool) -> WindowPolicy {
        if authenticated {
            self.sustained_authenticated
        } else {
            self.sustained_anonymous
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        for (name, policy) in [
            ("burst", self.burst),
            ("sustained_anonymous", self.sustained_anonymous),
            ("sustained_authenticated", self.sustained_authenticated),
            ("anonymous_daily", self.anonymous_daily),
        ] {
            if policy.limit <= 0 {
                return Err(format!("{} limit must be positive", name));
            }
            if policy.window_minutes <= 0 {
                return Err(format!("{} window_minutes must be positive", name));
            }
        }
        Ok(())
    }
}
