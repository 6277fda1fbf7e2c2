use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sessionctl_core::{CapacitySnapshot, SessionRecord};
use uuid::Uuid;

/// Request body for `POST /api/v3/sessions/intents` (§4.7). `kind` selects
/// the variant; field casing is the wire's camelCase, independent of the
/// Rust-side snake_case fields.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntentRequest {
    #[serde(rename_all = "camelCase")]
    StreamStart {
        service_ref: String,
        priority: String,
        idempotency_key: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    StreamStop { session_id: Uuid },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResponse {
    pub session_id: Uuid,
    pub status: String,
}

/// Session read-model returned by the list and detail endpoints (§6). The
/// list endpoint only ever returns rows with `lifecycle == "active"`; the
/// detail endpoint may also return terminal states.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProjection {
    pub id: Uuid,
    pub service_ref: String,
    pub priority: &'static str,
    pub lifecycle: &'static str,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_reason: Option<String>,
}

impl SessionProjection {
    #[must_use]
    pub fn from_record(record: &SessionRecord, now: DateTime<Utc>, stall_window: std::time::Duration) -> Self {
        let lifecycle = record.derive_lifecycle(now, stall_window);
        let terminal_reason = record.terminal.as_ref().map(|(reason, _)| format!("{reason:?}"));
        Self {
            id: record.id.0,
            service_ref: record.service_ref.clone(),
            priority: record.priority.as_str(),
            lifecycle: lifecycle.as_str(),
            created_at: record.created_at,
            terminal_reason,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacitySnapshotDto {
    pub tuner_slots_total: u32,
    pub tuner_slots_in_use: u32,
    pub gpu_tokens_total: u32,
    pub gpu_tokens_in_use: u32,
    pub per_class_counts: BTreeMap<String, u32>,
}

impl From<&CapacitySnapshot> for CapacitySnapshotDto {
    fn from(snapshot: &CapacitySnapshot) -> Self {
        Self {
            tuner_slots_total: snapshot.tuner_slots_total,
            tuner_slots_in_use: snapshot.tuner_slots_in_use,
            gpu_tokens_total: snapshot.gpu_tokens_total,
            gpu_tokens_in_use: snapshot.gpu_tokens_in_use,
            per_class_counts: snapshot
                .per_class_counts
                .iter()
                .map(|(class, count)| (class.as_str().to_string(), *count))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub owner: String,
    pub uptime_seconds: i64,
    pub lifecycle_counts: BTreeMap<String, u32>,
    pub capacity: CapacitySnapshotDto,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub capacity: CapacitySnapshotDto,
    pub session_count: usize,
    pub refreshed_at: DateTime<Utc>,
}
