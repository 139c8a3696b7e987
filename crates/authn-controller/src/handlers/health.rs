//! Health check handlers.
//!
//! Provides endpoints for liveness and readiness probes.

use crate::errors::ControllerError;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub status: &'static str,
    pub generation: u64,
    pub routes_enforced: usize,
}

/// Liveness: the process is serving requests.
#[instrument(skip_all, name = "authn.health.check")]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Readiness: at least one policy snapshot has been applied.
///
/// Returns 503 until the first snapshot is applied. Routes whose providers
/// are still fetching keys do not affect readiness; they report
/// `Unverifiable` per request instead.
#[instrument(skip_all, name = "authn.health.ready")]
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadyResponse>, ControllerError> {
    let status = state.controller.status();
    if status.generation == 0 {
        return Err(ControllerError::NotReady(
            "no policy snapshot applied yet".to_string(),
        ));
    }

    Ok(Json(ReadyResponse {
        status: "ready",
        generation: status.generation,
        routes_enforced: state.controller.compiled().plans.len(),
    }))
}
