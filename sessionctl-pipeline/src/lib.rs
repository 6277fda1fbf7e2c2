//! The media pipeline collaborator interface (§4.9, §6).
//!
//! The real encoder/remuxer invocation and HLS segment writing are out of
//! scope for the control plane (§1) — this crate defines only the boundary
//! the orchestrator drives, plus an in-process mock used by tests and the
//! demo binary to exercise every lifecycle and failure path without an
//! actual upstream Enigma2 receiver.

mod error;
mod mock;

use async_trait::async_trait;
use sessionctl_core::{PipelineId, SessionId};
use std::time::Duration;
use tokio::sync::mpsc;

pub use error::{FailureClass, PipelineError};
pub use mock::{MockPipeline, PipelineScenario};

/// Progress events a running pipeline emits. The orchestrator translates
/// these onto the event bus and into recorded session facts; the pipeline
/// itself has no knowledge of sessions, leases, or the bus.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// First HLS segment written — drives `starting -> buffering`.
    FirstSegment,
    /// Playhead started advancing — drives `buffering -> active`.
    PlayheadAdvanced,
    /// Heartbeat-style progress marker with no state transition implied.
    Progress,
    /// Pipeline hit an error; `retriable` mirrors `FailureClass`.
    Error { class: FailureClass, message: String },
    /// Pipeline has fully stopped (in response to `stop` or on its own).
    Stopped,
}

/// A running pipeline instance, returned by `MediaPipeline::start`.
pub struct PipelineHandle {
    pub id: PipelineId,
    pub events: mpsc::Receiver<PipelineEvent>,
}

/// The interface the orchestrator consumes from the media pipeline
/// collaborator (§4.6, §4.9).
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    async fn start(
        &self,
        session_id: SessionId,
        service_ref: &str,
    ) -> Result<PipelineHandle, PipelineError>;

    /// Ask the pipeline to stop; the orchestrator bounds this by
    /// `PipelineStopTimeout` and kills on timeout at a higher layer.
    async fn stop(&self, pipeline_id: PipelineId, timeout: Duration) -> Result<(), PipelineError>;
}
