//! Policy file watcher background task.
//!
//! Re-reads the config snapshot file on an interval and applies it when its
//! contents change. A file that cannot be read or parsed is logged and the
//! current policy stays in force.
//!
//! # Graceful Shutdown
//!
//! The task exits when its cancellation token is cancelled.

use crate::controller::{AuthnController, ConfigSnapshot};
use crate::errors::ControllerError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Read and parse a config snapshot file.
///
/// # Errors
///
/// Returns `ControllerError::PolicyLoad` if the file cannot be read or is
/// not a valid snapshot.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn load_snapshot(path: &Path) -> Result<(Vec<u8>, ConfigSnapshot), ControllerError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ControllerError::PolicyLoad(format!("{}: {e}", path.display())))?;
    let snapshot = ConfigSnapshot::from_json(&bytes)
        .map_err(|e| ControllerError::PolicyLoad(format!("{}: {e}", path.display())))?;
    Ok((bytes, snapshot))
}

/// Run the policy watcher loop.
///
/// The first check happens immediately. Exits when `cancel_token` is
/// cancelled.
pub async fn start_policy_watcher(
    controller: Arc<AuthnController>,
    path: PathBuf,
    reload_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut interval = tokio::time::interval(reload_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_applied: Option<Vec<u8>> = None;

    info!(
        target: "authn.tasks.policy_watcher",
        path = %path.display(),
        interval_secs = reload_interval.as_secs(),
        "Policy watcher started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match load_snapshot(&path).await {
                    Ok((bytes, snapshot)) => {
                        if last_applied.as_deref() == Some(bytes.as_slice()) {
                            continue;
                        }
                        let report = controller.apply(&snapshot);
                        info!(
                            target: "authn.tasks.policy_watcher",
                            generation = report.generation,
                            clean = report.is_clean(),
                            "Policy reloaded"
                        );
                        last_applied = Some(bytes);
                    }
                    Err(e) => {
                        warn!(
                            target: "authn.tasks.policy_watcher",
                            error = %e,
                            "Policy reload failed, keeping current policy"
                        );
                    }
                }
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "authn.tasks.policy_watcher",
                    "Policy watcher received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}
