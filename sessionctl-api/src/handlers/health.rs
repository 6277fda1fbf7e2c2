use std::collections::BTreeMap;
use std::time::Duration;

use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;

use crate::auth::AuthContext;
use crate::dto::SystemHealth;
use crate::error::ApiError;
use crate::state::AppState;

/// `GET /healthz` — process liveness (§6). No auth required: a probe that
/// itself needed a valid token would defeat the point of a liveness check.
pub async fn healthz(State(state): State<AppState>) -> StatusCode {
    let threshold = state.runtime_config.heartbeat_every.max(Duration::from_secs(1)) * 3;
    if state.liveness.is_alive(threshold) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// `GET /readyz` — 200 only once the first refresh and store probe at
/// startup have both succeeded (§6).
pub async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// `GET /api/v3/system/health` (scope `v3:status`).
pub async fn system_health(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<SystemHealth>, ApiError> {
    auth.require(sessionctl_core::Scope::Status)?;

    let now = Utc::now();
    let sessions = state.store.scan_sessions().await?;

    let mut lifecycle_counts: BTreeMap<String, u32> = BTreeMap::new();
    for session in &sessions {
        let lifecycle = session.derive_lifecycle(now, state.runtime_config.stall_window);
        *lifecycle_counts.entry(lifecycle.as_str().to_string()).or_insert(0) += 1;
    }

    let capacity = state.capacity.snapshot(&sessions);

    Ok(Json(SystemHealth {
        owner: state.orchestrator.owner().0.clone(),
        uptime_seconds: state.uptime().num_seconds(),
        lifecycle_counts,
        capacity: (&capacity).into(),
    }))
}
