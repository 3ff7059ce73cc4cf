// Server mode - scheduler daemon with an HTTP admin surface
//
// Wires the pipeline components per configuration, runs the scheduler on
// its fixed interval, and serves /health, /ready and /stats. Shutdown is
// graceful on INT/TERM/QUIT: the HTTP server stops accepting, the
// in-flight tick completes, then the process exits.

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use geosink_config::RuntimeConfig;
use geosink_pipeline::Scheduler;

mod handlers;
mod init;

use handlers::{health_check, ready_check, stats};
use init::{build_components, init_tracing, Components};

/// Application state shared across admin requests
#[derive(Clone)]
pub(crate) struct AppState {
    pub health: Arc<geosink_pipeline::HealthCheck>,
    pub scheduler: Arc<Scheduler>,
}

/// Graceful shutdown handler: INT, TERM or QUIT.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(unix)]
    let quit = async {
        signal::unix::signal(signal::unix::SignalKind::quit())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
        _ = quit => {
            info!("Received SIGQUIT, starting graceful shutdown...");
        },
    }
}

/// Run exactly one tick and exit. Fails (non-zero exit) when the tick
/// reports failure.
pub async fn run_once(config: RuntimeConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    init_tracing(&config);

    let Components { scheduler, .. } = build_components(&config).await?;

    let result = scheduler.run_once().await?;
    info!(
        "tick finished: success={} records={} backups={}/{} recovered={}/{}",
        result.success,
        result.records_processed,
        result.backups_processed,
        result.backups_failed,
        result.recovery_processed,
        result.recovery_failed
    );

    if !result.success {
        let reason = result
            .error
            .or(result.gps.error)
            .or(result.mobile.error)
            .unwrap_or_else(|| "tick reported failure".to_string());
        anyhow::bail!("tick failed: {}", reason);
    }
    Ok(())
}

/// Entry point for daemon mode
pub async fn run_with_config(config: RuntimeConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    init_tracing(&config);

    info!("geosink starting: scheduler daemon with admin surface");

    let addr = config
        .server
        .as_ref()
        .map(|s| s.listen_addr.clone())
        .unwrap_or_else(|| "0.0.0.0:8080".to_string());

    let Components { scheduler, health } = build_components(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.clone().run(shutdown_rx));

    let state = AppState {
        health,
        scheduler: scheduler.clone(),
    };
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/stats", get(stats))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind to {}", addr))?;

    info!("admin surface listening on http://{}", addr);
    info!("  GET http://{}/health - Health check", addr);
    info!("  GET http://{}/ready  - Readiness check", addr);
    info!("  GET http://{}/stats  - Scheduler statistics", addr);
    info!("Press Ctrl+C or send SIGTERM to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Admin surface is down; let the in-flight tick finish before exit.
    if shutdown_tx.send(true).is_err() {
        error!("scheduler already stopped");
    }
    if let Err(e) = scheduler_task.await {
        error!("scheduler task ended abnormally: {}", e);
    }

    info!("shutdown complete");
    Ok(())
}
