//! Authentication controller error types.
//!
//! Service-level errors map to HTTP status codes via the `IntoResponse`
//! impl. Messages returned to clients are generic; details are logged
//! server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Controller error type.
///
/// Maps to HTTP status codes:
/// - PolicyLoad: 500 Internal Server Error
/// - NotReady: 503 Service Unavailable
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Failed to load policy: {0}")]
    PolicyLoad(String),

    #[error("Not ready: {0}")]
    NotReady(String),
}

impl ControllerError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            ControllerError::PolicyLoad(_) => 500,
            ControllerError::NotReady(_) => 503,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ControllerError::PolicyLoad(err) => {
                tracing::error!(target: "authn.policy", error = %err, "Policy load failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "POLICY_ERROR",
                    "The authentication policy could not be loaded".to_string(),
                )
            }
            ControllerError::NotReady(reason) => {
                tracing::debug!(target: "authn.availability", reason = %reason, "Not ready");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "NOT_READY",
                    "Service is not ready".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
