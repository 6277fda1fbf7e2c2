//! Shared types and client-less behavior for the sessionctl control plane.
//!
//! This crate holds the data model (§3 of the design spec), the closed error
//! taxonomy (§7), and a small `Clock` abstraction so that the pure decision
//! functions in `sessionctl-runtime` (admission, lifecycle derivation) can be
//! tested against fixed instants instead of `Utc::now()`.

mod clock;
mod error;
mod ids;
mod lease;
mod pipeline;
mod policy;
mod session;

pub use clock::{Clock, SystemClock};
pub use error::{AdmissionRejectReason, CoreError, InvariantRule};
pub use ids::{IdempotencyKey, OwnerId, PipelineId, SessionId, TokenSubject};
pub use lease::{Lease, LeaseKey};
pub use pipeline::{PipelineRecord, PipelineStage};
pub use policy::{OutboundPolicy, Scope};
pub use session::{
    CapacitySnapshot, ClientContext, IdempotencyEntry, LifecycleState, PriorityClass,
    SessionRecord, SessionSummary, TerminalReason,
};
