use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sessionctl_runtime::{CapacityModel, EventBus, Metrics, Orchestrator, RuntimeConfig};
use sessionctl_store::StateStore;

use crate::config::ApiConfig;
use crate::rate_limit::CallerRateLimiter;

/// A cheap liveness pulse the binary's event loop (or any background task
/// standing in for it) touches on its own cadence; `/healthz` checks that
/// the pulse is recent rather than reaching into the orchestrator directly,
/// so the liveness check never itself blocks on a stalled component.
#[derive(Default)]
pub struct Liveness {
    last_tick_unix_millis: AtomicI64,
}

impl Liveness {
    pub fn touch(&self) {
        self.last_tick_unix_millis
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_alive(&self, max_age: std::time::Duration) -> bool {
        let last = self.last_tick_unix_millis.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        let age_millis = Utc::now().timestamp_millis().saturating_sub(last);
        age_millis >= 0 && (age_millis as u64) <= max_age.as_millis() as u64
    }
}

/// Shared, process-wide dependencies the HTTP layer is injected with at
/// startup (§6 "Process-wide state"). Cheap to clone: every field is
/// already an `Arc` or itself cheap to copy.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub runtime_config: Arc<RuntimeConfig>,
    pub store: Arc<dyn StateStore>,
    pub bus: Arc<EventBus>,
    pub orchestrator: Arc<Orchestrator>,
    pub capacity: Arc<CapacityModel>,
    pub metrics: Arc<Metrics>,
    pub liveness: Arc<Liveness>,
    pub rate_limiter: Arc<CallerRateLimiter>,
    ready: Arc<AtomicBool>,
    started_at: chrono::DateTime<Utc>,
}

impl AppState {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ApiConfig>,
        runtime_config: Arc<RuntimeConfig>,
        store: Arc<dyn StateStore>,
        bus: Arc<EventBus>,
        orchestrator: Arc<Orchestrator>,
        capacity: Arc<CapacityModel>,
        metrics: Arc<Metrics>,
        rate_limiter: Arc<CallerRateLimiter>,
    ) -> Self {
        Self {
            config,
            runtime_config,
            store,
            bus,
            orchestrator,
            capacity,
            metrics,
            liveness: Arc::new(Liveness::default()),
            rate_limiter,
            ready: Arc::new(AtomicBool::new(false)),
            started_at: Utc::now(),
        }
    }

    /// §6: `/readyz` only returns 200 after the first successful refresh and
    /// store probe; the bin crate calls this once that has happened.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.started_at)
    }
}
