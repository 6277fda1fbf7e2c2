use std::time::Duration as StdDuration;

use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use sessionctl_core::{IdempotencyEntry, IdempotencyKey, LeaseKey, OwnerId, PriorityClass, Scope, SessionId, SessionRecord};
use sessionctl_runtime::{decide, BusEvent, Decision, Intent};
use sessionctl_store::LeaseManager;

use crate::auth::AuthContext;
use crate::dto::{IntentRequest, IntentResponse};
use crate::error::ApiError;
use crate::state::AppState;

/// How long the per-service-ref admission lease is held for (§4.6): long
/// enough to cover a scan→decide→create round trip against the store, short
/// enough that a crash between acquire and release doesn't wedge the next
/// `stream_start` for this service ref.
const SERVICE_LEASE_TTL: StdDuration = StdDuration::from_secs(5);

/// `POST /api/v3/sessions/intents` (scope `v3:write`, §4.7).
pub async fn post_intents(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<IntentRequest>,
) -> Result<Response, ApiError> {
    auth.require(Scope::Write)?;

    match body {
        IntentRequest::StreamStart {
            service_ref,
            priority,
            idempotency_key,
        } => stream_start(&state, &auth, service_ref, priority, idempotency_key).await,
        IntentRequest::StreamStop { session_id } => stream_stop(&state, SessionId(session_id)).await,
    }
}

async fn stream_start(
    state: &AppState,
    auth: &AuthContext,
    service_ref: String,
    priority: String,
    idempotency_key: Option<String>,
) -> Result<Response, ApiError> {
    if service_ref.trim().is_empty() {
        return Err(ApiError::Validation("serviceRef must not be empty".into()));
    }
    let idempotency_key = idempotency_key.map(IdempotencyKey);

    // Idempotent repeat: an entry already claims this (subject, key) pair.
    if let Some(key) = &idempotency_key {
        if let Some(existing) = state.store.get_idempotency(&auth.subject, key).await? {
            return Ok(accepted_response(existing.session_id, StatusCode::OK));
        }
    }

    // Serializes admission for this service ref (§4.6): without the lease,
    // two concurrent requests for the same (subject, serviceRef) both scan
    // before either writes, both pass the existing-session check, and both
    // create a non-terminal session — violating I1. Each call gets its own
    // owner identity; the store treats re-acquisition by the same owner as
    // a renewal rather than a conflict, so a shared owner would defeat the
    // mutual exclusion this is for.
    let lease_key = LeaseKey::for_service(&service_ref);
    let leases = LeaseManager::new(state.store.clone(), OwnerId::generate("sessionctl-api"));
    if leases.acquire(lease_key.clone(), SERVICE_LEASE_TTL, Utc::now()).await?.is_none() {
        let reason = sessionctl_core::AdmissionRejectReason::IdempotencyConflict;
        state.metrics.admission_reject_total.with_label_values(&[reason.as_str()]).inc();
        return Err(ApiError::AdmissionRejected {
            reason,
            retry_after: Some(StdDuration::from_millis(200)),
        });
    }
    let result = stream_start_admitted(state, auth, service_ref, priority, idempotency_key).await;
    let _ = leases.release(&lease_key).await;
    result
}

async fn stream_start_admitted(
    state: &AppState,
    auth: &AuthContext,
    service_ref: String,
    priority: String,
    idempotency_key: Option<IdempotencyKey>,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let sessions = state.store.scan_sessions().await?;
    let intent = Intent {
        subject: auth.subject.clone(),
        service_ref: service_ref.clone(),
        priority,
        idempotency_key: idempotency_key.clone(),
        implied_target: None,
        cidr_allowed: true,
    };

    let decision = decide(&intent, &sessions, &state.config.outbound_policy, &state.capacity, now);

    let session_id = match decision {
        Decision::Admit => admit_new_session(state, &auth.subject, service_ref, &intent.priority, idempotency_key, now).await?,
        Decision::ExistingSession(id) => id,
        Decision::Preempt { victim, .. } => {
            match state.orchestrator.preempt_victim(victim).await {
                Ok(true) => {
                    admit_new_session(state, &auth.subject, service_ref, &intent.priority, idempotency_key, now).await?
                }
                Ok(false) | Err(_) => {
                    let reason = sessionctl_core::AdmissionRejectReason::PoolFull;
                    state.metrics.admission_reject_total.with_label_values(&[reason.as_str()]).inc();
                    return Err(ApiError::AdmissionRejected {
                        reason,
                        retry_after: Some(StdDuration::from_secs(5)),
                    });
                }
            }
        }
        Decision::Reject { reason, retry_after } => {
            state.metrics.admission_reject_total.with_label_values(&[reason.as_str()]).inc();
            return Err(ApiError::AdmissionRejected { reason, retry_after });
        }
    };

    state.bus.publish(BusEvent::IntentAccepted { session_id }, "api", now);
    state.orchestrator.requeue_after(session_id, StdDuration::ZERO);

    Ok(accepted_response(session_id, StatusCode::ACCEPTED))
}

async fn admit_new_session(
    state: &AppState,
    subject: &sessionctl_core::TokenSubject,
    service_ref: String,
    priority: &str,
    idempotency_key: Option<IdempotencyKey>,
    now: chrono::DateTime<Utc>,
) -> Result<SessionId, ApiError> {
    let priority_class: PriorityClass = priority
        .parse()
        .map_err(|_| ApiError::Validation(format!("unknown priority class: {priority}")))?;
    let client = sessionctl_core::ClientContext {
        address: None,
        user_agent: None,
        token_subject: subject.clone(),
        request_id: uuid::Uuid::new_v4().to_string(),
    };
    let record = SessionRecord::new(service_ref, priority_class, client, idempotency_key.clone(), now);
    let session_id = record.id;
    state.store.put_session(record).await?;

    if let Some(key) = idempotency_key {
        let entry = IdempotencyEntry {
            subject: subject.clone(),
            key,
            session_id,
            created_at: now,
        };
        let claimed = state.store.put_idempotency_if_absent(entry).await?;
        if claimed.session_id != session_id {
            // Lost a race with a concurrent identical request; discard our
            // orphan record and defer to the one that won.
            state.store.delete_session(session_id).await?;
            return Ok(claimed.session_id);
        }
    }

    Ok(session_id)
}

async fn stream_stop(state: &AppState, session_id: SessionId) -> Result<Response, ApiError> {
    // Idempotent by design: publish regardless of whether the session is
    // already terminal or even exists, since the caller is told 202 either
    // way (§4.7).
    state
        .bus
        .publish(BusEvent::StopRequested { session_id }, "api", Utc::now());
    Ok(StatusCode::ACCEPTED.into_response())
}

fn accepted_response(session_id: SessionId, status: StatusCode) -> Response {
    (
        status,
        Json(IntentResponse {
            session_id: session_id.0,
            status: "accepted".into(),
        }),
    )
        .into_response()
}
