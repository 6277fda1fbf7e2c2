use std::collections::{BTreeMap, HashSet};

use sessionctl_core::{CapacitySnapshot, InvariantRule, PriorityClass, SessionRecord};

/// Tracks the two finite pools described in §4.3.
///
/// Reservations are not held as separate state here: the `SessionRecord`
/// itself is the source of truth for `tuner_slot`/`gpu_token` (§3), so this
/// type is a pure query over whatever snapshot of non-terminal sessions the
/// caller passes in — "derived from enumeration of non-terminal sessions",
/// per §4.3.
#[derive(Debug, Clone)]
pub struct CapacityModel {
    tuner_slots: Vec<u32>,
    gpu_tokens_total: u32,
}

impl CapacityModel {
    #[must_use]
    pub fn new(tuner_slots: Vec<u32>, gpu_tokens_total: u32) -> Self {
        Self {
            tuner_slots,
            gpu_tokens_total,
        }
    }

    #[must_use]
    pub fn snapshot(&self, sessions: &[SessionRecord]) -> CapacitySnapshot {
        let live: Vec<&SessionRecord> = sessions.iter().filter(|s| !s.is_terminal()).collect();
        let tuner_slots_in_use = live.iter().filter(|s| s.tuner_slot.is_some()).count() as u32;
        let gpu_tokens_in_use = live.iter().filter(|s| s.gpu_token.is_some()).count() as u32;

        let mut per_class_counts: BTreeMap<PriorityClass, u32> = BTreeMap::new();
        for session in &live {
            *per_class_counts.entry(session.priority).or_insert(0) += 1;
        }

        CapacitySnapshot {
            tuner_slots_total: self.tuner_slots.len() as u32,
            tuner_slots_in_use,
            gpu_tokens_total: self.gpu_tokens_total,
            gpu_tokens_in_use,
            per_class_counts,
        }
    }

    /// First tuner slot id not held by any non-terminal session, if any.
    #[must_use]
    pub fn reserve_tuner_slot(&self, sessions: &[SessionRecord]) -> Option<u32> {
        let used: HashSet<u32> = sessions
            .iter()
            .filter(|s| !s.is_terminal())
            .filter_map(|s| s.tuner_slot)
            .collect();
        self.tuner_slots.iter().find(|slot| !used.contains(slot)).copied()
    }

    /// First GPU token index not held by any non-terminal session, if any.
    #[must_use]
    pub fn reserve_gpu_token(&self, sessions: &[SessionRecord]) -> Option<u32> {
        let used: HashSet<u32> = sessions
            .iter()
            .filter(|s| !s.is_terminal())
            .filter_map(|s| s.gpu_token)
            .collect();
        (0..self.gpu_tokens_total).find(|token| !used.contains(token))
    }

    /// Detect drift between "derived" (this scan) and "recorded" reservation
    /// state: two non-terminal sessions holding the same slot/token (§4.3,
    /// I2, P1).
    #[must_use]
    pub fn detect_invariant_violations(&self, sessions: &[SessionRecord]) -> Vec<InvariantRule> {
        let mut violations = Vec::new();
        let live: Vec<&SessionRecord> = sessions.iter().filter(|s| !s.is_terminal()).collect();

        let mut seen_slots = HashSet::new();
        let mut duplicate_slot = false;
        for slot in live.iter().filter_map(|s| s.tuner_slot) {
            if !seen_slots.insert(slot) {
                duplicate_slot = true;
            }
        }

        let mut seen_tokens = HashSet::new();
        let mut duplicate_token = false;
        for token in live.iter().filter_map(|s| s.gpu_token) {
            if !seen_tokens.insert(token) {
                duplicate_token = true;
            }
        }

        if duplicate_slot || duplicate_token {
            violations.push(InvariantRule::DuplicateReservation);
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sessionctl_core::{ClientContext, TokenSubject};

    fn client() -> ClientContext {
        ClientContext {
            address: None,
            user_agent: None,
            token_subject: TokenSubject("alice".into()),
            request_id: "r1".into(),
        }
    }

    fn session_with(priority: PriorityClass, tuner_slot: Option<u32>, gpu_token: Option<u32>) -> SessionRecord {
        let mut record = SessionRecord::new("svc".into(), priority, client(), None, Utc::now());
        record.tuner_slot = tuner_slot;
        record.gpu_token = gpu_token;
        record
    }

    #[test]
    fn snapshot_counts_only_non_terminal_sessions() {
        let model = CapacityModel::new(vec![0, 1, 2, 3], 4);
        let mut terminal = session_with(PriorityClass::Live, Some(0), None);
        terminal.terminal = Some((sessionctl_core::TerminalReason::Stopped, Utc::now()));
        let live = session_with(PriorityClass::Live, Some(1), None);
        let snapshot = model.snapshot(&[terminal, live]);
        assert_eq!(snapshot.tuner_slots_in_use, 1);
    }

    #[test]
    fn reserve_tuner_slot_skips_slots_in_use() {
        let model = CapacityModel::new(vec![0, 1], 0);
        let held = session_with(PriorityClass::Live, Some(0), None);
        assert_eq!(model.reserve_tuner_slot(&[held]), Some(1));
    }

    #[test]
    fn reserve_tuner_slot_none_when_pool_full() {
        let model = CapacityModel::new(vec![0], 0);
        let held = session_with(PriorityClass::Live, Some(0), None);
        assert_eq!(model.reserve_tuner_slot(&[held]), None);
    }

    #[test]
    fn duplicate_reservation_is_flagged() {
        let model = CapacityModel::new(vec![0, 1], 0);
        let a = session_with(PriorityClass::Live, Some(0), None);
        let b = session_with(PriorityClass::Recording, Some(0), None);
        let violations = model.detect_invariant_violations(&[a, b]);
        assert!(violations.contains(&InvariantRule::DuplicateReservation));
    }
}
