//! mr-server: HTTP API, health reporting, and process lifecycle.
//!
//! This crate ties the other mr-* crates into a running service:
//!
//! - Axum-based HTTP API for submitting and inspecting transcoder jobs
//! - `/health` endpoint backed by the heartbeat and readiness state
//! - Startup self-check of the transcoder, periodic re-check
//! - Graceful drain on SIGINT/SIGTERM

pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mr_core::config::Config;

use crate::context::AppContext;

/// Name reported by `GET /`.
pub const SERVICE_NAME: &str = "mediarelay";

/// Start the mediarelay server.
///
/// Binds the listener, builds the [`AppContext`], and serves until a shutdown
/// signal arrives. Returns an error if the listener cannot be bound, or if
/// the transcoder self-check fails and `server.exit_on_fatal` is set.
pub async fn start(config: Config) -> mr_core::Result<()> {
    config.check()?;
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| mr_core::Error::Validation(format!("Invalid server address: {e}")))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| mr_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    let ctx = AppContext::build(config)?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    run(ctx, listener, shutdown).await
}

/// Serve `ctx` on `listener` until `shutdown` fires, then drain.
///
/// The listener is already accepting when the self-check runs, so `/health`
/// reports `starting` and then `ready` or `unhealthy` to whoever polls it.
pub async fn run(
    ctx: AppContext,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> mr_core::Result<()> {
    let local = listener.local_addr()?;
    let background = CancellationToken::new();
    let server_stop = CancellationToken::new();

    let heartbeat = ctx.health.spawn_heartbeat(background.clone());

    let app = router::build_router(ctx.clone());
    let stop = server_stop.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
    });

    tracing::info!("Listening on {local}");

    let check = ctx.tools.self_check().await;
    ctx.health.record_self_check(&check);
    let fatal = check.err();

    let mut recheck = None;
    match &fatal {
        Some(e) if ctx.config.server.exit_on_fatal => {
            let delay = ctx.config.server.fatal_exit_delay();
            tracing::error!("Startup failed: {e}; exiting in {delay:?}");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {}
            }
        }
        _ => {
            let every = ctx.config.health.recheck_interval_secs;
            if every > 0 {
                recheck = Some(ctx.health.spawn_recheck(
                    ctx.tools.clone(),
                    std::time::Duration::from_secs(every),
                    background.clone(),
                ));
            }
            shutdown.cancelled().await;
            tracing::info!("Shutdown requested");
        }
    }

    let cancelled = ctx.coordinator.drain(ctx.config.server.drain_grace()).await;
    if cancelled > 0 {
        tracing::warn!("{cancelled} job(s) cancelled during drain");
    }

    server_stop.cancel();
    background.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("HTTP server error: {e}"),
        Err(e) => tracing::warn!("HTTP server task failed: {e}"),
    }
    let _ = heartbeat.await;
    if let Some(handle) = recheck {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");

    match fatal {
        Some(e) if ctx.config.server.exit_on_fatal => Err(e),
        _ => Ok(()),
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
