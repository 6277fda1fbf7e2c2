use thiserror::Error;

/// How a pipeline failure should be handled by the orchestrator (§4.6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// A single retry with exponential backoff is permitted.
    Retriable,
    /// Terminal; the session transitions to `failed`.
    Fatal,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline failed to start ({class:?}): {message}")]
    StartFailed { class: FailureClass, message: String },

    #[error("pipeline did not stop within the configured timeout")]
    StopTimedOut,

    #[error("no such pipeline handle")]
    NotFound,
}
