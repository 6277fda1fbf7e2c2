use axum::extract::{Extension, State};
use axum::Json;
use chrono::Utc;
use sessionctl_core::Scope;
use sessionctl_runtime::BusEvent;

use crate::auth::AuthContext;
use crate::dto::RefreshResponse;
use crate::error::ApiError;
use crate::state::AppState;

/// `POST /api/v3/system/refresh` (scope `v3:admin`, §6): recomputes capacity
/// and derived snapshots, updates the exported gauges, and also satisfies
/// the startup readiness probe the first time it runs successfully.
pub async fn refresh(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<RefreshResponse>, ApiError> {
    auth.require(Scope::Admin)?;

    let now = Utc::now();
    let sessions = state.store.scan_sessions().await?;
    let snapshot = state.capacity.snapshot(&sessions);

    state.metrics.tuners_in_use.set(i64::from(snapshot.tuner_slots_in_use));
    state.metrics.gpu_tokens_in_use.set(i64::from(snapshot.gpu_tokens_in_use));
    for class in [
        sessionctl_core::PriorityClass::Pulse,
        sessionctl_core::PriorityClass::Live,
        sessionctl_core::PriorityClass::Recording,
    ] {
        let count = snapshot.per_class_counts.get(&class).copied().unwrap_or(0);
        state
            .metrics
            .active_sessions
            .with_label_values(&[class.as_str()])
            .set(i64::from(count));
    }

    state.bus.publish(BusEvent::CapacityChanged(snapshot.clone()), "api", now);
    state.mark_ready();

    Ok(Json(RefreshResponse {
        capacity: (&snapshot).into(),
        session_count: sessions.len(),
        refreshed_at: now,
    }))
}
