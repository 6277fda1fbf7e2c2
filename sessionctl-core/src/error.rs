use thiserror::Error;

/// The closed set of admission-reject reason codes (§4.4).
///
/// These appear verbatim in the `X-Admission-Factor` response header and in
/// the `xg2g_admission_reject_total{reason}` metric, so the `Display` impl
/// below is the wire format, not just a debugging aid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionRejectReason {
    GpuBusy,
    PoolFull,
    TunerBusy,
    PolicyDenied,
    InvalidClass,
    IdempotencyConflict,
    AuthzDenied,
    BackendUnavailable,
}

impl AdmissionRejectReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GpuBusy => "gpu_busy",
            Self::PoolFull => "pool_full",
            Self::TunerBusy => "tuner_busy",
            Self::PolicyDenied => "policy_denied",
            Self::InvalidClass => "invalid_class",
            Self::IdempotencyConflict => "idempotency_conflict",
            Self::AuthzDenied => "authz_denied",
            Self::BackendUnavailable => "backend_unavailable",
        }
    }
}

impl std::fmt::Display for AdmissionRejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names of the internal invariants the sweeper and capacity model watch for
/// (§4.3, §4.8), used as the `rule` label on `xg2g_invariant_violation_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvariantRule {
    DuplicateReservation,
    OrphanedPipeline,
    LeaseWithoutSession,
    SessionWithoutLease,
    SpawnOnReject,
    BusDrop,
    CapacityDrift,
}

impl InvariantRule {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateReservation => "duplicate_reservation",
            Self::OrphanedPipeline => "orphaned_pipeline",
            Self::LeaseWithoutSession => "lease_without_session",
            Self::SessionWithoutLease => "session_without_lease",
            Self::SpawnOnReject => "spawn_on_reject",
            Self::BusDrop => "bus_drop",
            Self::CapacityDrift => "capacity_drift",
        }
    }
}

impl std::fmt::Display for InvariantRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can arise from client-less, in-process behavior shared by the
/// whole control plane (validation of the data model itself, not any one
/// component's I/O).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown priority class: {0}")]
    UnknownPriorityClass(String),

    #[error("malformed session id: {0}")]
    MalformedSessionId(#[source] uuid::Error),
}
