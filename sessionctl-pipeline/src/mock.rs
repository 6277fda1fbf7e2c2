use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sessionctl_core::{PipelineId, SessionId};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::{FailureClass, PipelineError};
use crate::{MediaPipeline, PipelineEvent, PipelineHandle};

/// Canned behavior for one service reference, used to drive the mock
/// through every lifecycle and failure path the test suite needs (§4.9).
#[derive(Debug, Clone)]
pub struct PipelineScenario {
    pub preflight_delay: Duration,
    pub first_segment_delay: Duration,
    pub playhead_delay: Duration,
    /// If set, `start` fails immediately with this classification instead
    /// of spawning anything.
    pub start_failure: Option<(FailureClass, String)>,
    /// If set, the running pipeline emits an error partway through instead
    /// of ever reaching `PlayheadAdvanced`.
    pub mid_stream_failure: Option<(Duration, FailureClass, String)>,
}

impl Default for PipelineScenario {
    fn default() -> Self {
        Self {
            preflight_delay: Duration::from_millis(5),
            first_segment_delay: Duration::from_millis(5),
            playhead_delay: Duration::from_millis(5),
            start_failure: None,
            mid_stream_failure: None,
        }
    }
}

/// In-process stand-in for the real encoder/remuxer + HLS writer (§1, §4.9).
///
/// Scenarios are keyed by service reference so a test can make one upstream
/// channel behave normally while another is configured to fail, without any
/// of the callers needing to know this is a mock.
pub struct MockPipeline {
    scenarios: Mutex<HashMap<String, PipelineScenario>>,
    running: Mutex<HashMap<PipelineId, AbortHandle>>,
}

impl MockPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scenarios: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_scenario(&self, service_ref: impl Into<String>, scenario: PipelineScenario) {
        self.scenarios.lock().insert(service_ref.into(), scenario);
    }

    fn scenario_for(&self, service_ref: &str) -> PipelineScenario {
        self.scenarios
            .lock()
            .get(service_ref)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MockPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaPipeline for MockPipeline {
    async fn start(
        &self,
        session_id: SessionId,
        service_ref: &str,
    ) -> Result<PipelineHandle, PipelineError> {
        let scenario = self.scenario_for(service_ref);
        if let Some((class, message)) = scenario.start_failure {
            return Err(PipelineError::StartFailed { class, message });
        }

        let id = PipelineId::new();
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            tokio::time::sleep(scenario.preflight_delay).await;
            tokio::time::sleep(scenario.first_segment_delay).await;
            if tx.send(PipelineEvent::FirstSegment).await.is_err() {
                return;
            }

            if let Some((delay, class, message)) = scenario.mid_stream_failure {
                tokio::time::sleep(delay).await;
                let _ = tx.send(PipelineEvent::Error { class, message }).await;
                return;
            }

            tokio::time::sleep(scenario.playhead_delay).await;
            if tx.send(PipelineEvent::PlayheadAdvanced).await.is_err() {
                return;
            }

            // Keep emitting progress so the orchestrator's stall detection
            // has something to observe until the session is stopped.
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                if tx.send(PipelineEvent::Progress).await.is_err() {
                    break;
                }
            }
        });

        debug!(%session_id, %service_ref, pipeline_id = %id, "mock pipeline started");
        self.running.lock().insert(id, task.abort_handle());

        Ok(PipelineHandle { id, events: rx })
    }

    async fn stop(&self, pipeline_id: PipelineId, timeout: Duration) -> Result<(), PipelineError> {
        let handle = self.running.lock().remove(&pipeline_id);
        match handle {
            Some(handle) => {
                handle.abort();
                // The mock stops instantly once aborted; a real pipeline
                // would await graceful shutdown up to `timeout` first.
                let _ = timeout;
                Ok(())
            }
            None => Err(PipelineError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_scenario_reaches_playhead_advanced() {
        let pipeline = MockPipeline::new();
        let mut handle = pipeline
            .start(SessionId::new(), "svc-1")
            .await
            .expect("start succeeds");
        let first = handle.events.recv().await.unwrap();
        assert!(matches!(first, PipelineEvent::FirstSegment));
        let second = handle.events.recv().await.unwrap();
        assert!(matches!(second, PipelineEvent::PlayheadAdvanced));
    }

    #[tokio::test]
    async fn start_failure_never_produces_a_handle() {
        let pipeline = MockPipeline::new();
        pipeline.set_scenario(
            "svc-bad",
            PipelineScenario {
                start_failure: Some((FailureClass::Fatal, "upstream refused".into())),
                ..Default::default()
            },
        );
        let result = pipeline.start(SessionId::new(), "svc-bad").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn mid_stream_failure_is_observed_before_playhead() {
        let pipeline = MockPipeline::new();
        pipeline.set_scenario(
            "svc-flaky",
            PipelineScenario {
                mid_stream_failure: Some((
                    Duration::from_millis(1),
                    FailureClass::Retriable,
                    "transient upstream hiccup".into(),
                )),
                ..Default::default()
            },
        );
        let mut handle = pipeline.start(SessionId::new(), "svc-flaky").await.unwrap();
        assert!(matches!(handle.events.recv().await, Some(PipelineEvent::FirstSegment)));
        assert!(matches!(
            handle.events.recv().await,
            Some(PipelineEvent::Error { class: FailureClass::Retriable, .. })
        ));
    }

    #[tokio::test]
    async fn stop_on_unknown_pipeline_errors() {
        let pipeline = MockPipeline::new();
        let result = pipeline.stop(PipelineId::new(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PipelineError::NotFound)));
    }
}
