//! Background pass that reclaims sessions no one is driving forward and
//! trims old terminal records (§4.8).
//!
//! The sweeper never mutates a session under lease — it only acts on
//! sessions whose own facts (no progress within `idle_timeout`, terminal
//! past `session_retention`) already justify the action, so it never needs
//! to race the orchestrator for ownership of a live session.

use std::sync::Arc;

use chrono::Utc;
use sessionctl_core::{InvariantRule, TerminalReason};
use sessionctl_store::StateStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::lifecycle;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;

pub struct Sweeper {
    store: Arc<dyn StateStore>,
    orchestrator: Arc<Orchestrator>,
    config: RuntimeConfig,
    metrics: Arc<Metrics>,
}

impl Sweeper {
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        orchestrator: Arc<Orchestrator>,
        config: RuntimeConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            config,
            metrics,
        }
    }

    /// Runs passes on `sweeper_interval` cadence until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweeper_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.pass().await {
                        warn!(%error, "sweeper pass failed, will retry next tick");
                    }
                }
            }
        }
    }

    /// One pass: idle-timeout terminations, terminal-record retention, and
    /// invariant-violation accounting. Bounded by a single scan of each
    /// collection — never holds a session lease across the whole pass.
    pub async fn pass(&self) -> Result<SweepReport, crate::error::RuntimeError> {
        let timer = self.metrics.sweep_duration_seconds.start_timer();
        let now = Utc::now();
        let mut report = SweepReport::default();

        let sessions = self.store.scan_sessions().await?;

        for session in &sessions {
            if session.is_terminal() {
                continue;
            }
            let last_activity = session
                .last_progress_at
                .or(session.first_segment_at)
                .unwrap_or(session.created_at);
            let idle_for = now.signed_duration_since(last_activity);
            let idle_timeout = chrono::Duration::from_std(self.config.idle_timeout)
                .unwrap_or_else(|_| chrono::Duration::zero());
            if idle_for > idle_timeout {
                self.orchestrator
                    .mutate_session(session.id, |r| {
                        lifecycle::mark_terminal(r, TerminalReason::Idle, now);
                    })
                    .await?;
                self.orchestrator.requeue_after(session.id, std::time::Duration::ZERO);
                report.idle_terminated += 1;
            }
        }

        let sessions_after = self.store.scan_sessions().await?;
        let retention = chrono::Duration::from_std(self.config.session_retention)
            .unwrap_or_else(|_| chrono::Duration::zero());
        for session in &sessions_after {
            if let Some((_, terminal_at)) = &session.terminal {
                if now.signed_duration_since(*terminal_at) > retention {
                    self.store.delete_session(session.id).await?;
                    report.retired += 1;
                }
            }
        }

        let violations = crate::capacity::CapacityModel::new(
            self.config.tuner_slots.clone(),
            self.config.gpu_tokens_total,
        )
        .detect_invariant_violations(&sessions_after);
        for rule in &violations {
            self.metrics
                .invariant_violation_total
                .with_label_values(&[rule.as_str()])
                .inc();
        }
        report.invariant_violations = violations.len();

        let leases = self.store.scan_leases().await?;
        let non_terminal_ids: std::collections::HashSet<_> =
            sessions_after.iter().filter(|s| !s.is_terminal()).map(|s| s.id).collect();
        for lease in &leases {
            let Some(session_id_str) = lease.key.0.strip_prefix("session:") else {
                continue;
            };
            let Ok(session_id) = session_id_str.parse::<sessionctl_core::SessionId>() else {
                continue;
            };
            if !non_terminal_ids.contains(&session_id) {
                self.metrics
                    .invariant_violation_total
                    .with_label_values(&[InvariantRule::LeaseWithoutSession.as_str()])
                    .inc();
            }
        }
        let leased_session_ids: std::collections::HashSet<_> = leases
            .iter()
            .filter_map(|l| l.key.0.strip_prefix("session:"))
            .filter_map(|s| s.parse::<sessionctl_core::SessionId>().ok())
            .collect();
        for session in &sessions_after {
            if session.is_terminal() {
                continue;
            }
            let lease_overdue = session
                .lease_expiry
                .is_some_and(|expiry| now.signed_duration_since(expiry) > chrono::Duration::seconds(60));
            if (!leased_session_ids.contains(&session.id) && session.lease_owner.is_some()) || lease_overdue {
                self.metrics
                    .invariant_violation_total
                    .with_label_values(&[InvariantRule::SessionWithoutLease.as_str()])
                    .inc();
            }
        }

        let pipelines = self.store.scan_pipelines().await?;
        let session_ids: std::collections::HashSet<_> = sessions_after.iter().map(|s| s.id).collect();
        for pipeline in &pipelines {
            if !session_ids.contains(&pipeline.session_id) {
                warn!(pipeline_id = %pipeline.id, "orphaned pipeline record with no owning session, deleting");
                self.store.delete_pipeline(pipeline.id).await?;
                self.metrics
                    .invariant_violation_total
                    .with_label_values(&[InvariantRule::OrphanedPipeline.as_str()])
                    .inc();
                report.orphaned_pipelines += 1;
            }
        }

        timer.observe_duration();
        info!(
            idle_terminated = report.idle_terminated,
            retired = report.retired,
            invariant_violations = report.invariant_violations,
            orphaned_pipelines = report.orphaned_pipelines,
            "sweep pass complete"
        );
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub idle_terminated: usize,
    pub retired: usize,
    pub invariant_violations: usize,
    pub orphaned_pipelines: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionctl_core::{ClientContext, PriorityClass, SessionRecord, TokenSubject};
    use sessionctl_pipeline::MockPipeline;
    use sessionctl_store::InMemoryStore;

    fn client() -> ClientContext {
        ClientContext {
            address: None,
            user_agent: None,
            token_subject: TokenSubject("alice".into()),
            request_id: "r1".into(),
        }
    }

    fn harness(config: RuntimeConfig) -> (Sweeper, Arc<dyn StateStore>) {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::in_memory());
        let metrics = Arc::new(Metrics::new().unwrap());
        let bus = Arc::new(crate::bus::EventBus::new(16, metrics.clone()));
        let pipeline = Arc::new(MockPipeline::new());
        let capacity = crate::capacity::CapacityModel::new(config.tuner_slots.clone(), config.gpu_tokens_total);
        let (orchestrator, _due) =
            Orchestrator::new(store.clone(), bus, pipeline, capacity, config.clone(), metrics.clone(), "test-host");
        (Sweeper::new(store.clone(), orchestrator, config, metrics), store)
    }

    #[tokio::test]
    async fn idle_session_is_terminated_after_the_configured_timeout() {
        let mut config = RuntimeConfig::defaults(vec![0], 1);
        config.idle_timeout = std::time::Duration::from_secs(60);
        let (sweeper, store) = harness(config);

        let now = Utc::now();
        let mut record = SessionRecord::new("svc-1".into(), PriorityClass::Live, client(), None, now);
        record.last_progress_at = Some(now - chrono::Duration::seconds(120));
        let id = record.id;
        store.put_session(record).await.unwrap();

        let report = sweeper.pass().await.unwrap();
        assert_eq!(report.idle_terminated, 1);

        let after = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(after.terminal.as_ref().map(|(r, _)| r.clone()), Some(TerminalReason::Idle));
    }

    #[tokio::test]
    async fn active_session_is_left_alone() {
        let mut config = RuntimeConfig::defaults(vec![0], 1);
        config.idle_timeout = std::time::Duration::from_secs(60);
        let (sweeper, store) = harness(config);

        let now = Utc::now();
        let mut record = SessionRecord::new("svc-1".into(), PriorityClass::Live, client(), None, now);
        record.last_progress_at = Some(now);
        let id = record.id;
        store.put_session(record).await.unwrap();

        let report = sweeper.pass().await.unwrap();
        assert_eq!(report.idle_terminated, 0);
        assert!(!store.get_session(id).await.unwrap().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn terminal_records_past_retention_are_deleted() {
        let mut config = RuntimeConfig::defaults(vec![0], 1);
        config.session_retention = std::time::Duration::from_secs(3600);
        let (sweeper, store) = harness(config);

        let now = Utc::now();
        let mut record = SessionRecord::new("svc-1".into(), PriorityClass::Live, client(), None, now);
        record.terminal = Some((TerminalReason::Stopped, now - chrono::Duration::seconds(7200)));
        let id = record.id;
        store.put_session(record).await.unwrap();

        let report = sweeper.pass().await.unwrap();
        assert_eq!(report.retired, 1);
        assert!(store.get_session(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn orphaned_pipeline_records_are_cleaned_up() {
        let config = RuntimeConfig::defaults(vec![0], 1);
        let (sweeper, store) = harness(config);

        let now = Utc::now();
        let orphan = sessionctl_core::PipelineRecord {
            id: sessionctl_core::PipelineId::new(),
            session_id: sessionctl_core::SessionId::new(),
            started_at: now,
            last_progress_at: None,
            stage: sessionctl_core::PipelineStage::Streaming,
            error: None,
        };
        let orphan_id = orphan.id;
        store.put_pipeline(orphan).await.unwrap();

        let report = sweeper.pass().await.unwrap();
        assert_eq!(report.orphaned_pipelines, 1);
        assert!(store.get_pipeline(orphan_id).await.unwrap().is_none());
    }
}
