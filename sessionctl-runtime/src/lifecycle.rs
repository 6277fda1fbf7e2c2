use chrono::{DateTime, Utc};
use sessionctl_core::{SessionRecord, TerminalReason};

/// Transition helpers the orchestrator calls in response to pipeline events,
/// stop intents, and sweeper decisions. Each one records a fact and bumps
/// `generation` (I4); none of them compute `LifecycleState` themselves —
/// that stays `SessionRecord::derive_lifecycle`'s job alone (P3).
///
/// Every helper is a no-op once the record is terminal, so a stray event
/// racing a terminal transition can never resurrect a finished session (P5).
pub fn record_first_segment(record: &mut SessionRecord, now: DateTime<Utc>) {
    if record.is_terminal() || record.first_segment_at.is_some() {
        return;
    }
    record.first_segment_at = Some(now);
    record.last_progress_at = Some(now);
    record.touch();
}

pub fn record_playhead_started(record: &mut SessionRecord, now: DateTime<Utc>) {
    if record.is_terminal() || record.playhead_started_at.is_some() {
        return;
    }
    record.playhead_started_at = Some(now);
    record.last_progress_at = Some(now);
    record.touch();
}

pub fn record_progress(record: &mut SessionRecord, now: DateTime<Utc>) {
    if record.is_terminal() {
        return;
    }
    record.last_progress_at = Some(now);
    record.touch();
}

pub fn request_stop(record: &mut SessionRecord, now: DateTime<Utc>) {
    if record.is_terminal() || record.stop_requested_at.is_some() {
        return;
    }
    record.stop_requested_at = Some(now);
    record.touch();
}

/// Marks the record terminal. No-op if already terminal, so concurrent
/// terminal transitions for the same session (e.g. a stop intent racing a
/// pipeline failure) collapse onto whichever one lands first.
pub fn mark_terminal(record: &mut SessionRecord, reason: TerminalReason, now: DateTime<Utc>) {
    if record.is_terminal() {
        return;
    }
    record.terminal = Some((reason, now));
    record.touch();
}
