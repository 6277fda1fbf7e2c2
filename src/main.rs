//! Entry point for the sessionctl control plane (§1, §6).
//!
//! Everything that actually implements the session control plane lives in
//! `sessionctl-core`/`-store`/`-runtime`/`-api`; this binary only does what
//! §1 scopes out of the core — CLI plumbing, configuration loading, and
//! process bootstrap/shutdown.

mod config;
mod observability;
mod startup;

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use sessionctl_api::build_router;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = config::CliArgs::parse();
    observability::init(cli.log_json);

    let settings = config::load(&cli).context("loading configuration")?;
    let bind_addr = settings.api.bind_addr;
    let shutdown_budget = settings.api.shutdown_budget;

    let hostname = hostname_or_fallback();
    let running = startup::wire(&settings, &hostname).await?;

    announce_ready(&running.state).await?;

    let router = build_router(running.state.clone());
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    tracing::info!(%bind_addr, owner = %running.state.orchestrator.owner(), "sessionctl listening");

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited with an error")?;

    tracing::info!("shutting down, draining background tasks");
    running.shutdown(shutdown_budget).await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Runs the equivalent of `POST /api/v3/system/refresh` once, directly
/// against the wired components rather than through the (auth-gated) HTTP
/// handler, since there is no caller identity at startup to authorize
/// against. `/readyz` only returns 200 once this has succeeded (§6).
async fn announce_ready(state: &sessionctl_api::AppState) -> anyhow::Result<()> {
    let sessions = state.store.scan_sessions().await.context("startup refresh: scanning sessions")?;
    let snapshot = state.capacity.snapshot(&sessions);
    state.metrics.tuners_in_use.set(i64::from(snapshot.tuner_slots_in_use));
    state.metrics.gpu_tokens_in_use.set(i64::from(snapshot.gpu_tokens_in_use));
    state.mark_ready();
    tracing::info!(
        tuner_slots_in_use = snapshot.tuner_slots_in_use,
        gpu_tokens_in_use = snapshot.gpu_tokens_in_use,
        "initial capacity refresh complete, marked ready"
    );
    Ok(())
}

fn hostname_or_fallback() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "sessionctl".to_string())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut handler) => {
                handler.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
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
}
