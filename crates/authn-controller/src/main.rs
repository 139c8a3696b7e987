//! Authentication Controller
//!
//! Entry point: loads configuration, starts the policy watcher and serves
//! health, status and metrics.

use authn_controller::config::Config;
use authn_controller::controller::AuthnController;
use authn_controller::keys::{HttpJwksFetcher, KeyCache};
use authn_controller::observability::metrics::init_metrics_recorder;
use authn_controller::providers::ProviderRegistry;
use authn_controller::routes::{self, AppState};
use authn_controller::tasks::start_policy_watcher;
use authn_controller::verifier::RequestVerifier;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration before tracing so LOG_FORMAT can take effect
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.log_level.clone().into());
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Authentication Controller");
    info!(
        bind_address = %config.bind_address,
        policy_path = %config.policy_path.display(),
        reload_interval_secs = config.reload_interval.as_secs(),
        jwt_clock_skew_secs = config.jwt_clock_skew.as_secs(),
        key_cache_grace_secs = config.key_cache_grace.as_secs(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        anyhow::anyhow!(e)
    })?;

    let key_cache = KeyCache::with_grace(Arc::new(HttpJwksFetcher::new()), config.key_cache_grace);
    let verifier = RequestVerifier::new(key_cache.clone(), config.jwt_clock_skew);
    let controller = Arc::new(AuthnController::new(
        ProviderRegistry::default(),
        key_cache,
        verifier,
    ));

    let cancel_token = CancellationToken::new();
    let watcher = tokio::spawn(start_policy_watcher(
        Arc::clone(&controller),
        config.policy_path.clone(),
        config.reload_interval,
        cancel_token.child_token(),
    ));

    let state = Arc::new(AppState {
        controller: Arc::clone(&controller),
    });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Authentication Controller listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.drain_period))
        .await?;

    cancel_token.cancel();
    if let Err(e) = watcher.await {
        warn!("Policy watcher task ended abnormally: {}", e);
    }
    controller.shutdown();

    info!("Authentication Controller shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is complete.
async fn shutdown_signal(drain_period: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    if drain_period.is_zero() {
        info!("Skipping drain period (AUTHN_DRAIN_SECONDS=0)");
    } else {
        warn!("Draining connections for {} seconds...", drain_period.as_secs());
        tokio::time::sleep(drain_period).await;
        info!("Drain period complete");
    }
}
