//! Common configuration types for the authentication controller crates.

use serde::{Deserialize, Serialize};

/// Default log filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "authn_controller=info,common=info,tower_http=info";

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error or an EnvFilter spec)
    pub log_level: String,
    /// Enable JSON-formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// Build from the `LOG_FORMAT` value (`json` or anything else for text).
    #[must_use]
    pub fn from_log_format(log_format: Option<&str>) -> Self {
        Self {
            json_logs: log_format.is_some_and(|f| f.eq_ignore_ascii_case("json")),
            ..Self::default()
        }
    }
}
