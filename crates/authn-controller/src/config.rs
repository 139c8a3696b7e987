//! Authentication controller configuration.
//!
//! Configuration is loaded from environment variables and validated up
//! front; a bad value stops startup with a descriptive `ConfigError`.

use common::config::ObservabilityConfig;
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::keys::cache::DEFAULT_EVICTION_GRACE;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default policy file poll interval in seconds.
pub const DEFAULT_RELOAD_INTERVAL_SECONDS: u64 = 10;

/// Default drain period on shutdown in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 5;

/// Authentication controller configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP bind address for health, status and metrics (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Path of the JSON config snapshot (providers and routes).
    pub policy_path: PathBuf,

    /// How often the policy file is checked for changes.
    pub reload_interval: Duration,

    /// Clock skew tolerance for `exp`, `nbf` and `iat`.
    pub jwt_clock_skew: Duration,

    /// Delay before an unreferenced Key Cache entry is evicted.
    pub key_cache_grace: Duration,

    /// Drain period between the shutdown signal and exit.
    pub drain_period: Duration,

    pub observability: ObservabilityConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("policy_path", &self.policy_path)
            .field("reload_interval", &self.reload_interval)
            .field("jwt_clock_skew", &self.jwt_clock_skew)
            .field("key_cache_grace", &self.key_cache_grace)
            .field("drain_period", &self.drain_period)
            .field("json_logs", &self.observability.json_logs)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid reload interval configuration: {0}")]
    InvalidReloadInterval(String),

    #[error("Invalid key cache grace configuration: {0}")]
    InvalidKeyCacheGrace(String),

    #[error("Invalid drain configuration: {0}")]
    InvalidDrain(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for missing or invalid variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for missing or invalid variables.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let policy_path = vars
            .get("AUTHN_POLICY_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("AUTHN_POLICY_PATH".to_string()))?;

        let reload_secs = parse_secs(vars, "AUTHN_RELOAD_INTERVAL_SECONDS")
            .map_err(ConfigError::InvalidReloadInterval)?
            .unwrap_or(DEFAULT_RELOAD_INTERVAL_SECONDS);
        if reload_secs == 0 {
            return Err(ConfigError::InvalidReloadInterval(
                "AUTHN_RELOAD_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }

        // Parse JWT clock skew tolerance with validation
        let clock_skew_secs = parse_secs(vars, "JWT_CLOCK_SKEW_SECONDS")
            .map_err(ConfigError::InvalidJwtClockSkew)?
            .unwrap_or(DEFAULT_CLOCK_SKEW.as_secs());
        if clock_skew_secs == 0 {
            return Err(ConfigError::InvalidJwtClockSkew(
                "JWT_CLOCK_SKEW_SECONDS must be positive, got 0".to_string(),
            ));
        }
        if clock_skew_secs > MAX_CLOCK_SKEW.as_secs() {
            return Err(ConfigError::InvalidJwtClockSkew(format!(
                "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                MAX_CLOCK_SKEW.as_secs(),
                clock_skew_secs
            )));
        }

        let grace_secs = parse_secs(vars, "KEY_CACHE_GRACE_SECONDS")
            .map_err(ConfigError::InvalidKeyCacheGrace)?
            .unwrap_or(DEFAULT_EVICTION_GRACE.as_secs());

        let drain_secs = parse_secs(vars, "AUTHN_DRAIN_SECONDS")
            .map_err(ConfigError::InvalidDrain)?
            .unwrap_or(DEFAULT_DRAIN_SECONDS);

        let observability =
            ObservabilityConfig::from_log_format(vars.get("LOG_FORMAT").map(String::as_str));

        Ok(Config {
            bind_address,
            policy_path,
            reload_interval: Duration::from_secs(reload_secs),
            jwt_clock_skew: Duration::from_secs(clock_skew_secs),
            key_cache_grace: Duration::from_secs(grace_secs),
            drain_period: Duration::from_secs(drain_secs),
            observability,
        })
    }
}

/// Optional non-negative integer seconds.
fn parse_secs(vars: &HashMap<String, String>, name: &str) -> Result<Option<u64>, String> {
    vars.get(name)
        .map(|value| {
            value.parse::<u64>().map_err(|e| {
                format!("{name} must be a valid non-negative integer, got '{value}': {e}")
            })
        })
        .transpose()
}
