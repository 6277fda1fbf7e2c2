//! Explicit dependency injection for the process-wide singletons (§6
//! "Process-wide state"): one state store handle, one event bus, one
//! capacity model, one orchestrator, constructed here and torn down in
//! reverse order on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sessionctl_api::{AppState, CallerRateLimiter};
use sessionctl_pipeline::MockPipeline;
use sessionctl_runtime::{CapacityModel, EventBus, Metrics, Orchestrator, Sweeper};
use sessionctl_store::{InMemoryStore, StateStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::config::Settings;

/// Everything the bin crate needs to hold onto between startup and the
/// shutdown signal: the wired `AppState` the HTTP server is built from, the
/// background task handles, and the concrete store handle `persist()` is
/// called on (the `StateStore` trait object doesn't expose it, since most
/// implementations wouldn't have anything meaningful to flush).
pub struct Running {
    pub state: AppState,
    persistent_store: Arc<InMemoryStore>,
    shutdown: CancellationToken,
    orchestrator_handle: JoinHandle<()>,
    sweeper_handle: JoinHandle<()>,
    liveness_handle: JoinHandle<()>,
}

impl Running {
    /// Cancels every background task, waits up to `shutdown_budget` for them
    /// to drain, then flushes the store regardless of whether the drain
    /// finished in time (§5 shutdown budget; §6 reverse-order teardown).
    pub async fn shutdown(self, shutdown_budget: Duration) {
        self.shutdown.cancel();

        let drained = tokio::time::timeout(shutdown_budget, async {
            let _ = tokio::join!(self.orchestrator_handle, self.sweeper_handle, self.liveness_handle);
        })
        .await;
        if drained.is_err() {
            warn!(?shutdown_budget, "shutdown budget exceeded, flushing store anyway");
        }

        if let Err(err) = self.persistent_store.persist() {
            error!(error = %err, "failed to persist store snapshot during shutdown");
        }
    }
}

/// Builds the full dependency graph and spawns the orchestrator, sweeper,
/// and liveness-pulse background tasks. Returns once the initial store
/// probe has succeeded, but before readiness is announced — the caller
/// marks the state ready only after the HTTP listener is actually bound.
pub async fn wire(settings: &Settings, hostname: &str) -> anyhow::Result<Running> {
    let store_impl =
        InMemoryStore::open(settings.data_dir.clone()).context("opening state store (integrity check failed)")?;
    let persistent_store = Arc::new(store_impl);
    let store: Arc<dyn StateStore> = persistent_store.clone();

    store.scan_sessions().await.context("initial store probe")?;

    let metrics = Arc::new(Metrics::new().context("registering prometheus metrics")?);
    let bus = Arc::new(EventBus::new(256, metrics.clone()));
    let capacity = CapacityModel::new(
        settings.runtime.tuner_slots.clone(),
        settings.runtime.gpu_tokens_total,
    );
    let pipeline = Arc::new(MockPipeline::new());

    let (orchestrator, due) = Orchestrator::new(
        store.clone(),
        bus.clone(),
        pipeline,
        capacity.clone(),
        settings.runtime.clone(),
        metrics.clone(),
        hostname,
    );

    let rate_limiter = Arc::new(CallerRateLimiter::new(
        settings.api.rate_limit_per_minute,
        settings.api.rate_limit_burst,
    ));

    let app_state = AppState::new(
        Arc::new(settings.api.clone()),
        Arc::new(settings.runtime.clone()),
        store.clone(),
        bus.clone(),
        orchestrator.clone(),
        Arc::new(capacity),
        metrics.clone(),
        rate_limiter,
    );

    let shutdown = CancellationToken::new();

    let orchestrator_handle = {
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { orchestrator.run(due, shutdown).await })
    };

    let sweeper = Sweeper::new(
        store.clone(),
        orchestrator.clone(),
        settings.runtime.clone(),
        metrics.clone(),
    );
    let sweeper_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { sweeper.run(shutdown).await })
    };

    let liveness_handle = {
        let liveness = app_state.liveness.clone();
        let shutdown = shutdown.clone();
        let every = settings.runtime.heartbeat_every;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    _ = ticker.tick() => liveness.touch(),
                }
            }
        })
    };

    app_state.liveness.touch();

    Ok(Running {
        state: app_state,
        persistent_store,
        shutdown,
        orchestrator_handle,
        sweeper_handle,
        liveness_handle,
    })
}
