//! HTTP routes for the authentication controller.
//!
//! Defines the Axum router and application state.

use crate::controller::AuthnController;
use crate::handlers;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Policy controller (status, compiled policy).
    pub controller: Arc<AuthnController>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/v1/health` - Liveness
/// - `/v1/ready` - Readiness (a policy has been applied)
/// - `/v1/status` - Provider, route and Key Cache status
/// - `/v1/policy` - The compiled policy currently in force
/// - `/metrics` - Prometheus scrape endpoint
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/ready", get(handlers::readiness_check))
        .route("/v1/status", get(handlers::get_status))
        .route("/v1/policy", get(handlers::get_policy))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Apply global middleware layers
    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    api_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
