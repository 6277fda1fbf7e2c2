use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use sessionctl_core::{LifecycleState, Scope, SessionId};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::dto::SessionProjection;
use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/v3/sessions` (scope `v3:read`, `[SUPPLEMENT]`): the list
/// contract is strictly `{active}` — any non-`active` row is omitted rather
/// than reported with a different lifecycle value (§6).
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<SessionProjection>>, ApiError> {
    auth.require(Scope::Read)?;

    let now = Utc::now();
    let sessions = state.store.scan_sessions().await?;
    let active = sessions
        .iter()
        .filter(|record| record.derive_lifecycle(now, state.runtime_config.stall_window) == LifecycleState::Active)
        .map(|record| SessionProjection::from_record(record, now, state.runtime_config.stall_window))
        .collect();

    Ok(Json(active))
}

/// `GET /api/v3/sessions/{id}` (scope `v3:read`): unlike the list endpoint,
/// terminal lifecycles are returned as-is (§6) — except `preempted`, whose
/// detail read is a 410 Gone (§8 scenario 2: preempted is observable by its
/// absence, not by a 200 body describing it).
pub async fn get_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    auth.require(Scope::Read)?;

    let now = Utc::now();
    let record = state
        .store
        .get_session(SessionId(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {id} not found")))?;

    if record.derive_lifecycle(now, state.runtime_config.stall_window) == LifecycleState::Preempted {
        return Ok(StatusCode::GONE.into_response());
    }

    Ok(Json(SessionProjection::from_record(&record, now, state.runtime_config.stall_window)).into_response())
}
