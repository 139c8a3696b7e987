//! Status and policy inspection handlers.

use crate::compiler::CompiledPolicy;
use crate::routes::AppState;
use crate::status::StatusReport;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Provider and route conditions plus Key Cache state.
#[instrument(skip_all, name = "authn.status.get")]
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.controller.status())
}

/// The compiled policy (plans and upstream descriptors) currently in force.
#[instrument(skip_all, name = "authn.policy.get")]
pub async fn get_policy(State(state): State<Arc<AppState>>) -> Json<Arc<CompiledPolicy>> {
    Json(state.controller.compiled())
}
