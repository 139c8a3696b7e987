//! Metrics definitions for the authentication controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `authn_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `status`: `success` or a `FetchError` kind (5 values)
//! - `outcome`: verification outcome (4 values)
//! - `reason`: reject reasons (8 values)
//! - `kind`: compile/validation error kinds (bounded by enum variants)
//!
//! Endpoint URIs are deliberately NOT labels; per-endpoint detail lives in
//! the status report.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // JWKS fetches are bounded by the provider timeout (default 5s)
        .set_buckets_for_metric(
            Matcher::Prefix("authn_jwks_fetch".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set JWKS fetch buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Key Cache Metrics
// ============================================================================

/// Record one JWKS fetch attempt.
///
/// Metric: `authn_jwks_fetch_total`, `authn_jwks_fetch_duration_seconds`
/// Labels: `status`
pub fn record_jwks_fetch(status: &'static str, duration: Duration) {
    histogram!("authn_jwks_fetch_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
    counter!("authn_jwks_fetch_total", "status" => status).increment(1);
}

/// Set the number of live Key Cache entries.
///
/// Metric: `authn_key_cache_entries`
#[allow(clippy::cast_precision_loss)]
pub fn set_key_cache_entries(count: usize) {
    gauge!("authn_key_cache_entries").set(count as f64);
}

// ============================================================================
// Verification Metrics
// ============================================================================

/// Record one verification outcome.
///
/// Metric: `authn_verification_total`
/// Labels: `outcome`, `reason` (`none` unless rejected)
pub fn record_verification(outcome: &'static str, reason: &'static str) {
    counter!("authn_verification_total",
        "outcome" => outcome,
        "reason" => reason
    )
    .increment(1);
}

// ============================================================================
// Compilation Metrics
// ============================================================================

/// Record validation and compile errors from one apply.
///
/// Metric: `authn_compile_errors_total`
/// Labels: `stage` (`validate` or `compile`), `kind`
pub fn record_compile_error(stage: &'static str, kind: &'static str) {
    counter!("authn_compile_errors_total",
        "stage" => stage,
        "kind" => kind
    )
    .increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // Without an installed recorder these are no-ops; they must not panic.

    #[test]
    fn test_record_jwks_fetch() {
        record_jwks_fetch("success", Duration::from_millis(20));
        record_jwks_fetch("timeout", Duration::from_secs(5));
    }

    #[test]
    fn test_set_key_cache_entries() {
        set_key_cache_entries(0);
        set_key_cache_entries(3);
    }

    #[test]
    fn test_record_verification() {
        record_verification("authenticated", "none");
        record_verification("rejected", "expired");
    }

    #[test]
    fn test_record_compile_error() {
        record_compile_error("validate", "union_mismatch");
        record_compile_error("compile", "reference_not_found");
    }
}
