//! HTTP request handlers for the authentication controller.

pub mod health;
pub mod metrics;
pub mod status;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use status::{get_policy, get_status};
