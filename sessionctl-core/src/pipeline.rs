use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PipelineId, SessionId};

/// Stage of a running media pipeline, mirrored 1:1 with the Pipeline Record
/// while a non-terminal session owns it (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Preflight,
    Starting,
    Streaming,
    Draining,
}

/// Mirrors one running media pipeline process/task, owned 1:1 by a
/// non-terminal session while it runs (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub id: PipelineId,
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub last_progress_at: Option<DateTime<Utc>>,
    pub stage: PipelineStage,
    pub error: Option<String>,
}

impl PipelineRecord {
    #[must_use]
    pub fn new(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id: PipelineId::new(),
            session_id,
            started_at: now,
            last_progress_at: None,
            stage: PipelineStage::Preflight,
            error: None,
        }
    }
}
