use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{IdempotencyKey, OwnerId, PipelineId, SessionId, TokenSubject};

/// Requested priority class; determines resource requirements and
/// preemption policy (§3, §4.3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Pulse,
    Live,
    Recording,
}

impl PriorityClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pulse => "pulse",
            Self::Live => "live",
            Self::Recording => "recording",
        }
    }
}

impl std::fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PriorityClass {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pulse" => Ok(Self::Pulse),
            "live" => Ok(Self::Live),
            "recording" => Ok(Self::Recording),
            other => Err(crate::error::CoreError::UnknownPriorityClass(other.to_string())),
        }
    }
}

/// Caller metadata recorded at intent time, threaded into logs and error
/// bodies for correlation (§3, `[SUPPLEMENT]` request id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientContext {
    pub address: Option<String>,
    pub user_agent: Option<String>,
    pub token_subject: TokenSubject,
    pub request_id: String,
}

/// Why a session reached a terminal state.
///
/// `Idle` and `ResourceError` are treated as terminal alongside the three
/// named in §3 (`Stopped`, `Failed`, `Preempted`) — see DESIGN.md for the
/// reasoning: the sweeper's idle-timeout scenario (§8, scenario 3) and the
/// resource-reservation race (§4.6) both describe one-way transitions, and
/// terminal absorbency (P5) only holds if every one-way transition lands in
/// the terminal bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalReason {
    Stopped,
    Idle,
    Failed(String),
    Preempted,
    ResourceError(String),
}

/// Externally visible lifecycle state, derived from recorded facts + now
/// (§3, §4.6). Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    New,
    Starting,
    Buffering,
    Active,
    Stalled,
    Ending,
    Idle,
    Error,
    Stopped,
    Failed,
    Preempted,
}

impl LifecycleState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Error | Self::Stopped | Self::Failed | Self::Preempted
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Starting => "starting",
            Self::Buffering => "buffering",
            Self::Active => "active",
            Self::Stalled => "stalled",
            Self::Ending => "ending",
            Self::Idle => "idle",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Preempted => "preempted",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative unit of work (§3).
///
/// Every field here is a *recorded fact*. `derive_lifecycle` is the only
/// place that turns facts + `now` into the externally visible state; nothing
/// else should be computing lifecycle state from these fields directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub idempotency_key: Option<IdempotencyKey>,
    pub service_ref: String,
    pub priority: PriorityClass,
    pub created_at: DateTime<Utc>,
    pub client: ClientContext,

    // Recorded facts (§3).
    pub lease_owner: Option<OwnerId>,
    pub lease_expiry: Option<DateTime<Utc>>,
    pub pipeline_id: Option<PipelineId>,
    pub tuner_slot: Option<u32>,
    pub gpu_token: Option<u32>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_progress_at: Option<DateTime<Utc>>,
    pub first_segment_at: Option<DateTime<Utc>>,
    pub playhead_started_at: Option<DateTime<Utc>>,
    pub stop_requested_at: Option<DateTime<Utc>>,
    pub terminal: Option<(TerminalReason, DateTime<Utc>)>,
    /// Strictly increases across any observable fact change (I4).
    pub generation: u64,
}

impl SessionRecord {
    #[must_use]
    pub fn new(
        service_ref: String,
        priority: PriorityClass,
        client: ClientContext,
        idempotency_key: Option<IdempotencyKey>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            idempotency_key,
            service_ref,
            priority,
            created_at: now,
            client,
            lease_owner: None,
            lease_expiry: None,
            pipeline_id: None,
            tuner_slot: None,
            gpu_token: None,
            last_heartbeat_at: None,
            last_progress_at: None,
            first_segment_at: None,
            playhead_started_at: None,
            stop_requested_at: None,
            terminal: None,
            generation: 0,
        }
    }

    /// Total map over `(record, now)` with a closed output domain (P3).
    ///
    /// `stall_window` is policy (configured, bounded by `idle_timeout`), not
    /// a recorded fact, so it is passed in rather than stored on the record.
    #[must_use]
    pub fn derive_lifecycle(&self, now: DateTime<Utc>, stall_window: Duration) -> LifecycleState {
        if let Some((reason, _)) = &self.terminal {
            return match reason {
                TerminalReason::Stopped => LifecycleState::Stopped,
                TerminalReason::Idle => LifecycleState::Idle,
                TerminalReason::Failed(_) => LifecycleState::Failed,
                TerminalReason::Preempted => LifecycleState::Preempted,
                TerminalReason::ResourceError(_) => LifecycleState::Error,
            };
        }

        if self.stop_requested_at.is_some() {
            return LifecycleState::Ending;
        }

        if let Some(last_progress) = self.last_progress_at {
            let stale = now.signed_duration_since(last_progress);
            if stale > chrono::Duration::from_std(stall_window).unwrap_or(chrono::Duration::zero()) {
                return LifecycleState::Stalled;
            }
        }

        if self.first_segment_at.is_none() {
            return LifecycleState::Starting;
        }

        if self.playhead_started_at.is_none() {
            return LifecycleState::Buffering;
        }

        LifecycleState::Active
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// Bump the generation counter; call after any mutation to a recorded
    /// fact so I4 holds.
    pub fn touch(&mut self) {
        self.generation += 1;
    }
}

/// Read-model for the session list endpoint (`[SUPPLEMENT]`), recomputed on
/// demand, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub service_ref: String,
    pub priority: PriorityClass,
    pub lifecycle: LifecycleState,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time counts of reservable resources and in-use counts per class
/// (§3). Derived from enumeration of non-terminal sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub tuner_slots_total: u32,
    pub tuner_slots_in_use: u32,
    pub gpu_tokens_total: u32,
    pub gpu_tokens_in_use: u32,
    pub per_class_counts: BTreeMap<PriorityClass, u32>,
}

impl CapacitySnapshot {
    #[must_use]
    pub fn free_tuner_slots(&self) -> u32 {
        self.tuner_slots_total.saturating_sub(self.tuner_slots_in_use)
    }

    #[must_use]
    pub fn free_gpu_tokens(&self) -> u32 {
        self.gpu_tokens_total.saturating_sub(self.gpu_tokens_in_use)
    }
}

/// Maps `(token subject, idempotency key)` to a session id for a bounded
/// TTL (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    pub subject: TokenSubject,
    pub key: IdempotencyKey,
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientContext {
        ClientContext {
            address: None,
            user_agent: None,
            token_subject: TokenSubject("alice".into()),
            request_id: "req-1".into(),
        }
    }

    fn fresh(now: DateTime<Utc>) -> SessionRecord {
        SessionRecord::new("svc-1".into(), PriorityClass::Live, client(), None, now)
    }

    #[test]
    fn starts_in_starting_state() {
        let now = Utc::now();
        let record = fresh(now);
        assert_eq!(
            record.derive_lifecycle(now, Duration::from_secs(30)),
            LifecycleState::Starting
        );
    }

    #[test]
    fn buffering_after_first_segment_before_playhead() {
        let now = Utc::now();
        let mut record = fresh(now);
        record.first_segment_at = Some(now);
        record.last_progress_at = Some(now);
        assert_eq!(
            record.derive_lifecycle(now, Duration::from_secs(30)),
            LifecycleState::Buffering
        );
    }

    #[test]
    fn active_once_playhead_advances() {
        let now = Utc::now();
        let mut record = fresh(now);
        record.first_segment_at = Some(now);
        record.playhead_started_at = Some(now);
        record.last_progress_at = Some(now);
        assert_eq!(
            record.derive_lifecycle(now, Duration::from_secs(30)),
            LifecycleState::Active
        );
    }

    #[test]
    fn stalled_when_progress_goes_quiet() {
        let start = Utc::now();
        let mut record = fresh(start);
        record.first_segment_at = Some(start);
        record.playhead_started_at = Some(start);
        record.last_progress_at = Some(start);
        let later = start + chrono::Duration::seconds(60);
        assert_eq!(
            record.derive_lifecycle(later, Duration::from_secs(30)),
            LifecycleState::Stalled
        );
    }

    #[test]
    fn ending_once_stop_requested() {
        let now = Utc::now();
        let mut record = fresh(now);
        record.first_segment_at = Some(now);
        record.playhead_started_at = Some(now);
        record.last_progress_at = Some(now);
        record.stop_requested_at = Some(now);
        assert_eq!(
            record.derive_lifecycle(now, Duration::from_secs(30)),
            LifecycleState::Ending
        );
    }

    #[test]
    fn terminal_states_are_absorbing_regardless_of_other_facts() {
        let now = Utc::now();
        let mut record = fresh(now);
        record.terminal = Some((TerminalReason::Preempted, now));
        record.stop_requested_at = None;
        record.last_progress_at = Some(now - chrono::Duration::seconds(3600));
        assert_eq!(
            record.derive_lifecycle(now, Duration::from_secs(30)),
            LifecycleState::Preempted
        );
        assert!(record.is_terminal());
    }

    #[test]
    fn idle_and_resource_error_are_terminal() {
        assert!(LifecycleState::Idle.is_terminal());
        assert!(LifecycleState::Error.is_terminal());
        assert!(!LifecycleState::Stalled.is_terminal());
    }
}
