use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sessionctl_core::{AdmissionRejectReason, IdempotencyKey, OutboundPolicy, PriorityClass, SessionId, SessionRecord, TokenSubject};

use crate::capacity::CapacityModel;

/// Resolved network target an intent implies, if any. Resolution (service
/// reference → host/port/scheme) happens upstream of this crate; CIDR
/// membership is likewise resolved by the caller (`sessionctl-api`, which
/// depends on `ipnet`) into `cidr_allowed` so this function stays pure and
/// free of a network-parsing dependency (§3 `OutboundPolicy` doc comment).
#[derive(Debug, Clone)]
pub struct OutboundTarget {
    pub host: String,
    pub port: u16,
    pub scheme: String,
}

#[derive(Debug, Clone)]
pub struct Intent {
    pub subject: TokenSubject,
    pub service_ref: String,
    /// Not yet validated against the closed `PriorityClass` set — rule 6
    /// is exactly "this string didn't parse".
    pub priority: String,
    pub idempotency_key: Option<IdempotencyKey>,
    pub implied_target: Option<OutboundTarget>,
    /// Precomputed by the caller; `true` when there is no resolved IP to
    /// check or the IP falls inside an allowed CIDR.
    pub cidr_allowed: bool,
}

/// One of the three outcomes a decision can take (§4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admit,
    /// Rule 2: a non-terminal session for the same `(subject, service_ref)`
    /// already exists; return it rather than counting a second admission.
    ExistingSession(SessionId),
    Reject {
        reason: AdmissionRejectReason,
        retry_after: Option<Duration>,
    },
    Preempt {
        victim: SessionId,
        reason: &'static str,
    },
}

/// Pure decision function `(intent, snapshot, policy, time) -> Decision`
/// (§4.4). `sessions` stands in for "snapshot": the full, just-scanned set
/// of session records, from which both capacity occupancy and the
/// same-`(subject, service)` check are derived.
#[must_use]
pub fn decide(
    intent: &Intent,
    sessions: &[SessionRecord],
    policy: &OutboundPolicy,
    capacity: &CapacityModel,
    _now: DateTime<Utc>,
) -> Decision {
    // Rule 1: outbound policy.
    if let Some(target) = &intent.implied_target {
        let allowed = policy.allows_host(&target.host)
            && policy.allows_scheme(&target.scheme)
            && policy.allows_port(target.port)
            && intent.cidr_allowed;
        if !allowed {
            return Decision::Reject {
                reason: AdmissionRejectReason::PolicyDenied,
                retry_after: None,
            };
        }
    } else if !intent.cidr_allowed {
        return Decision::Reject {
            reason: AdmissionRejectReason::PolicyDenied,
            retry_after: None,
        };
    }

    // Rule 2: idempotent accept of an existing non-terminal session for the
    // same (subject, service reference) — distinct from the idempotency-key
    // map, which lives in the store and is consulted by the API layer.
    if let Some(existing) = sessions.iter().find(|s| {
        !s.is_terminal() && s.client.token_subject == intent.subject && s.service_ref == intent.service_ref
    }) {
        return Decision::ExistingSession(existing.id);
    }

    match PriorityClass::from_str(&intent.priority) {
        Ok(PriorityClass::Pulse) => {
            if capacity.reserve_gpu_token(sessions).is_some() {
                Decision::Admit
            } else {
                Decision::Reject {
                    reason: AdmissionRejectReason::GpuBusy,
                    retry_after: Some(Duration::from_secs(5)),
                }
            }
        }
        Ok(PriorityClass::Live) => {
            if capacity.reserve_tuner_slot(sessions).is_some() {
                Decision::Admit
            } else {
                Decision::Reject {
                    reason: AdmissionRejectReason::TunerBusy,
                    retry_after: Some(Duration::from_secs(5)),
                }
            }
        }
        Ok(PriorityClass::Recording) => {
            if capacity.reserve_tuner_slot(sessions).is_some() {
                return Decision::Admit;
            }
            let victim = sessions
                .iter()
                .filter(|s| !s.is_terminal() && s.priority == PriorityClass::Live)
                .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            match victim {
                Some(victim) => Decision::Preempt {
                    victim: victim.id,
                    reason: "recording_preempts_oldest_live",
                },
                None => Decision::Reject {
                    reason: AdmissionRejectReason::PoolFull,
                    retry_after: Some(Duration::from_secs(5)),
                },
            }
        }
        Err(_) => Decision::Reject {
            reason: AdmissionRejectReason::InvalidClass,
            retry_after: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionctl_core::ClientContext;

    fn client(subject: &str) -> ClientContext {
        ClientContext {
            address: None,
            user_agent: None,
            token_subject: TokenSubject(subject.into()),
            request_id: "r1".into(),
        }
    }

    fn intent(subject: &str, service_ref: &str, priority: &str) -> Intent {
        Intent {
            subject: TokenSubject(subject.into()),
            service_ref: service_ref.into(),
            priority: priority.into(),
            idempotency_key: None,
            implied_target: None,
            cidr_allowed: true,
        }
    }

    fn live_session(created_at: DateTime<Utc>) -> SessionRecord {
        let mut record = SessionRecord::new(
            "svc-live".into(),
            PriorityClass::Live,
            client("bob"),
            None,
            created_at,
        );
        record.tuner_slot = Some(0);
        record
    }

    #[test]
    fn pulse_admits_when_gpu_tokens_free() {
        let capacity = CapacityModel::new(vec![], 4);
        let decision = decide(&intent("alice", "svc-1", "pulse"), &[], &OutboundPolicy::default(), &capacity, Utc::now());
        assert_eq!(decision, Decision::Admit);
    }

    #[test]
    fn pulse_rejects_gpu_busy_when_saturated() {
        let capacity = CapacityModel::new(vec![], 0);
        let decision = decide(&intent("alice", "svc-1", "pulse"), &[], &OutboundPolicy::default(), &capacity, Utc::now());
        assert!(matches!(
            decision,
            Decision::Reject { reason: AdmissionRejectReason::GpuBusy, .. }
        ));
    }

    #[test]
    fn live_rejects_tuner_busy_when_saturated_b1() {
        let capacity = CapacityModel::new(vec![0], 0);
        let sessions = vec![live_session(Utc::now())];
        let decision = decide(&intent("alice", "svc-2", "live"), &sessions, &OutboundPolicy::default(), &capacity, Utc::now());
        assert!(matches!(
            decision,
            Decision::Reject { reason: AdmissionRejectReason::TunerBusy, .. }
        ));
    }

    #[test]
    fn recording_preempts_oldest_live_b1() {
        let capacity = CapacityModel::new(vec![0, 1], 0);
        let t0 = Utc::now();
        let oldest = live_session(t0);
        let mut newer = live_session(t0 + chrono::Duration::seconds(10));
        newer.tuner_slot = Some(1);
        let sessions = vec![newer.clone(), oldest.clone()];
        let decision = decide(&intent("alice", "svc-3", "recording"), &sessions, &OutboundPolicy::default(), &capacity, Utc::now());
        assert_eq!(
            decision,
            Decision::Preempt {
                victim: oldest.id,
                reason: "recording_preempts_oldest_live",
            }
        );
    }

    #[test]
    fn recording_rejects_pool_full_with_no_live_victim_b1() {
        let capacity = CapacityModel::new(vec![0], 0);
        let mut only_recording = SessionRecord::new(
            "svc-rec".into(),
            PriorityClass::Recording,
            client("carol"),
            None,
            Utc::now(),
        );
        only_recording.tuner_slot = Some(0);
        let decision = decide(
            &intent("alice", "svc-4", "recording"),
            &[only_recording],
            &OutboundPolicy::default(),
            &capacity,
            Utc::now(),
        );
        assert!(matches!(
            decision,
            Decision::Reject { reason: AdmissionRejectReason::PoolFull, .. }
        ));
    }

    #[test]
    fn unknown_class_is_rejected_invalid_class() {
        let capacity = CapacityModel::new(vec![], 0);
        let decision = decide(&intent("alice", "svc-5", "bogus"), &[], &OutboundPolicy::default(), &capacity, Utc::now());
        assert!(matches!(
            decision,
            Decision::Reject { reason: AdmissionRejectReason::InvalidClass, .. }
        ));
    }

    #[test]
    fn existing_non_terminal_session_is_returned_without_counting_again() {
        let capacity = CapacityModel::new(vec![], 0);
        let existing = SessionRecord::new("svc-6".into(), PriorityClass::Pulse, client("alice"), None, Utc::now());
        let decision = decide(
            &intent("alice", "svc-6", "pulse"),
            &[existing.clone()],
            &OutboundPolicy::default(),
            &capacity,
            Utc::now(),
        );
        assert_eq!(decision, Decision::ExistingSession(existing.id));
    }

    #[test]
    fn policy_denied_short_circuits_before_capacity_checks_rule_1() {
        let capacity = CapacityModel::new(vec![], 4);
        let mut policy = OutboundPolicy::default();
        policy.allowed_hosts.insert("ok.example".into());
        let mut bad_intent = intent("alice", "svc-7", "pulse");
        bad_intent.implied_target = Some(OutboundTarget {
            host: "blocked.example".into(),
            port: 443,
            scheme: "https".into(),
        });
        let decision = decide(&bad_intent, &[], &policy, &capacity, Utc::now());
        assert!(matches!(
            decision,
            Decision::Reject { reason: AdmissionRejectReason::PolicyDenied, .. }
        ));
    }

    /// P4: improving the snapshot never flips Admit -> Reject nor
    /// Preempt -> Reject.
    #[test]
    fn monotonicity_releasing_a_gpu_token_flips_reject_to_admit_p4() {
        let saturated = CapacityModel::new(vec![], 1);
        let held = SessionRecord::new("svc-8".into(), PriorityClass::Pulse, client("dave"), None, Utc::now());
        let mut held = held;
        held.gpu_token = Some(0);
        let rejected = decide(&intent("alice", "svc-9", "pulse"), &[held.clone()], &OutboundPolicy::default(), &saturated, Utc::now());
        assert!(matches!(rejected, Decision::Reject { reason: AdmissionRejectReason::GpuBusy, .. }));

        let freed = CapacityModel::new(vec![], 1);
        let decision = decide(&intent("alice", "svc-9", "pulse"), &[], &OutboundPolicy::default(), &freed, Utc::now());
        assert_eq!(decision, Decision::Admit);
    }
}
