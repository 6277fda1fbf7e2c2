use sessionctl_pipeline::PipelineError;
use sessionctl_store::{LeaseError, StoreError};
use thiserror::Error;

/// Errors arising from one orchestrator reconciliation attempt or one
/// sweeper pass (§7 "Resource" and "Store" kinds). Neither is user-facing;
/// both are logged and, for store errors, leave the session in its last
/// recorded state to be retried on the next trigger (§4.6 failure
/// semantics) rather than spinning a local retry storm.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("state store unavailable")]
    Store(#[from] StoreError),

    #[error("media pipeline error")]
    Pipeline(#[from] PipelineError),

    #[error("lease operation failed")]
    Lease(#[from] LeaseError),

    /// The admission controller believed a resource was free, but the
    /// reservation race lost by the time the orchestrator acted on it
    /// (§7 "Resource" kind).
    #[error("resource no longer available: {0}")]
    ResourceRace(&'static str),

    /// Victim could not be stopped within the bounded window; the new
    /// admit is converted to a reject and the victim is left running
    /// (§4.6 preemption failure semantics, fail-closed).
    #[error("preemption victim did not stop in time")]
    PreemptionTimedOut,
}
