//! The reconciliation engine (§4.6).
//!
//! One `Orchestrator` per process, constructed with explicit dependency
//! injection and shared as an `Arc` across the worker tasks it spawns, in
//! the same shape the teacher's `Controller` is built and run (§9: no
//! component looks up another via global state).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use sessionctl_core::{
    LeaseKey, OwnerId, PipelineId, PipelineRecord, PriorityClass, SessionId, SessionRecord,
    TerminalReason,
};
use sessionctl_pipeline::{FailureClass, MediaPipeline, PipelineError, PipelineEvent};
use sessionctl_store::{LeaseManager, StateStore, StoreError};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::bus::{BusEvent, EventBus};
use crate::capacity::CapacityModel;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::lifecycle;
use crate::metrics::Metrics;
use crate::scheduler::RequeueScheduler;

#[derive(Clone, Copy)]
enum Reservation {
    Tuner(u32),
    Gpu(u32),
}

fn terminal_reason_label(reason: &TerminalReason) -> &'static str {
    match reason {
        TerminalReason::Stopped => "stopped",
        TerminalReason::Idle => "idle",
        TerminalReason::Failed(_) => "failed",
        TerminalReason::Preempted => "preempted",
        TerminalReason::ResourceError(_) => "error",
    }
}

pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    bus: Arc<EventBus>,
    pipeline: Arc<dyn MediaPipeline>,
    capacity: CapacityModel,
    config: RuntimeConfig,
    metrics: Arc<Metrics>,
    owner: OwnerId,
    scheduler: RequeueScheduler,
    start_permits: Arc<Semaphore>,
    stop_permits: Arc<Semaphore>,
    retry_attempts: Mutex<HashMap<SessionId, u32>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        bus: Arc<EventBus>,
        pipeline: Arc<dyn MediaPipeline>,
        capacity: CapacityModel,
        config: RuntimeConfig,
        metrics: Arc<Metrics>,
        hostname: &str,
    ) -> (Arc<Self>, mpsc::Receiver<SessionId>) {
        let (scheduler, due) = RequeueScheduler::spawn();
        let orchestrator = Arc::new(Self {
            start_permits: Arc::new(Semaphore::new(config.start_concurrency)),
            stop_permits: Arc::new(Semaphore::new(config.stop_concurrency)),
            owner: OwnerId::generate(hostname),
            store,
            bus,
            pipeline,
            capacity,
            config,
            metrics,
            scheduler,
            retry_attempts: Mutex::new(HashMap::new()),
        });
        (orchestrator, due)
    }

    #[must_use]
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    fn lease_manager(&self) -> LeaseManager {
        LeaseManager::new(self.store.clone(), self.owner.clone())
    }

    /// Requeue this session for another reconciliation attempt, used by
    /// heartbeat cadence and pipeline-start retry backoff.
    pub fn requeue_after(&self, session_id: SessionId, delay: std::time::Duration) {
        self.scheduler.requeue_after(session_id, delay);
    }

    /// Drives the reconciliation loop until `shutdown` is cancelled,
    /// consuming bus triggers and scheduler due-items (§4.6, §9 shutdown
    /// budget).
    pub async fn run(
        self: Arc<Self>,
        mut due: mpsc::Receiver<SessionId>,
        shutdown: CancellationToken,
    ) {
        let mut intents = self.bus.subscribe("intent.accepted");
        let mut stops = self.bus.subscribe("intent.stop_requested");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("orchestrator shutting down");
                    break;
                }
                msg = intents.recv() => {
                    if let Some(msg) = msg {
                        if let BusEvent::IntentAccepted { session_id } = msg.event {
                            self.clone().spawn_attempt(session_id);
                        }
                    }
                }
                msg = stops.recv() => {
                    if let Some(msg) = msg {
                        if let BusEvent::StopRequested { session_id } = msg.event {
                            self.clone().spawn_stop_attempt(session_id);
                        }
                    }
                }
                session_id = due.recv() => {
                    if let Some(session_id) = session_id {
                        self.clone().spawn_attempt(session_id);
                    }
                }
            }
        }
    }

    fn spawn_attempt(self: Arc<Self>, session_id: SessionId) {
        tokio::spawn(async move {
            if let Err(error) = self.reconcile_once(session_id).await {
                warn!(%session_id, %error, "reconciliation attempt failed, will retry on next trigger");
            }
        });
    }

    /// Unlike [`Self::spawn_attempt`], records the stop fact before
    /// reconciling: `reconcile_once` only enters `handle_stop` once
    /// `stop_requested_at` is set, and nothing else on the stop path sets it.
    fn spawn_stop_attempt(self: Arc<Self>, session_id: SessionId) {
        tokio::spawn(async move {
            let now = Utc::now();
            if let Err(error) = self.mutate_session(session_id, |r| lifecycle::request_stop(r, now)).await {
                warn!(%session_id, %error, "failed to record stop request, will retry on next trigger");
                return;
            }
            if let Err(error) = self.reconcile_once(session_id).await {
                warn!(%session_id, %error, "reconciliation attempt failed, will retry on next trigger");
            }
        });
    }

    /// A single reconciliation attempt for one session (§4.6). Store
    /// transient errors abandon the attempt and surface to the caller, who
    /// logs and waits for the next trigger rather than retrying locally.
    ///
    /// Takes `&Arc<Self>` rather than `&self` because starting a pipeline
    /// spawns a detached consumer task that needs its own owned handle.
    #[instrument(skip(self), fields(%session_id))]
    pub async fn reconcile_once(self: &Arc<Self>, session_id: SessionId) -> Result<(), RuntimeError> {
        let Some(record) = self.store.get_session(session_id).await? else {
            return Ok(());
        };

        if record.is_terminal() {
            return self.cleanup_terminal(session_id).await;
        }

        let now = Utc::now();
        let lease_key = LeaseKey::for_session(session_id);
        let lease_manager = self.lease_manager();

        let holds_lease = lease_manager
            .renew(&lease_key, self.config.lease_ttl, now)
            .await?
            || lease_manager
                .acquire(lease_key, self.config.lease_ttl, now)
                .await?
                .is_some();

        if !holds_lease {
            // Another owner holds an unexpired lease; drop the attempt, it
            // will heartbeat.
            return Ok(());
        }

        let lease_ttl = chrono::Duration::from_std(self.config.lease_ttl).unwrap_or_else(|_| chrono::Duration::zero());
        self.mutate_session(session_id, |r| {
            r.lease_owner = Some(self.owner.clone());
            r.lease_expiry = Some(now + lease_ttl);
        })
        .await?;
        self.scheduler.requeue_after(session_id, self.config.heartbeat_every);

        let Some(record) = self.store.get_session(session_id).await? else {
            return Ok(());
        };
        if record.is_terminal() {
            return self.cleanup_terminal(session_id).await;
        }

        if record.stop_requested_at.is_some() {
            return self.handle_stop(session_id, &record).await;
        }

        if record.pipeline_id.is_none() {
            return self.start_pipeline(session_id, &record).await;
        }

        Ok(())
    }

    async fn handle_stop(self: &Arc<Self>, session_id: SessionId, record: &SessionRecord) -> Result<(), RuntimeError> {
        let _permit = self.stop_permits.acquire().await;
        if let Some(pipeline_id) = record.pipeline_id {
            match self.pipeline.stop(pipeline_id, self.config.pipeline_stop_timeout).await {
                Ok(()) | Err(PipelineError::NotFound) => {}
                // §5: a kill follows a stop timeout; still proceed to terminal.
                Err(PipelineError::StopTimedOut) => {
                    warn!(%session_id, "pipeline stop timed out, forcing terminal transition");
                }
                Err(other) => return Err(other.into()),
            }
        }
        self.mutate_session(session_id, |r| {
            lifecycle::mark_terminal(r, TerminalReason::Stopped, Utc::now());
        })
        .await?;
        self.cleanup_terminal(session_id).await
    }

    async fn start_pipeline(self: &Arc<Self>, session_id: SessionId, record: &SessionRecord) -> Result<(), RuntimeError> {
        let _permit = self.start_permits.acquire().await;
        let sessions = self.store.scan_sessions().await?;

        let reservation = match record.priority {
            PriorityClass::Pulse => self.capacity.reserve_gpu_token(&sessions).map(Reservation::Gpu),
            PriorityClass::Live | PriorityClass::Recording => {
                self.capacity.reserve_tuner_slot(&sessions).map(Reservation::Tuner)
            }
        };

        let Some(reservation) = reservation else {
            self.mutate_session(session_id, |r| {
                lifecycle::mark_terminal(
                    r,
                    TerminalReason::ResourceError("no capacity available at start time".into()),
                    Utc::now(),
                );
            })
            .await?;
            return self.cleanup_terminal(session_id).await;
        };

        self.mutate_session(session_id, |r| match reservation {
            Reservation::Tuner(slot) => r.tuner_slot = Some(slot),
            Reservation::Gpu(token) => r.gpu_token = Some(token),
        })
        .await?;

        match self.pipeline.start(session_id, &record.service_ref).await {
            Ok(handle) => {
                let pipeline_id = handle.id;
                self.store
                    .put_pipeline(PipelineRecord {
                        id: pipeline_id,
                        session_id,
                        started_at: Utc::now(),
                        last_progress_at: None,
                        stage: sessionctl_core::PipelineStage::Starting,
                        error: None,
                    })
                    .await?;
                self.mutate_session(session_id, |r| r.pipeline_id = Some(pipeline_id)).await?;
                self.retry_attempts.lock().remove(&session_id);
                self.spawn_pipeline_consumer(session_id, pipeline_id, handle.events);
                Ok(())
            }
            Err(PipelineError::StartFailed { class, message }) => {
                self.mutate_session(session_id, |r| {
                    r.tuner_slot = None;
                    r.gpu_token = None;
                })
                .await?;

                let attempts = {
                    let mut guard = self.retry_attempts.lock();
                    let entry = guard.entry(session_id).or_insert(0);
                    *entry += 1;
                    *entry
                };

                if class == FailureClass::Retriable && attempts <= 1 {
                    self.scheduler.requeue_after(session_id, std::time::Duration::from_secs(2));
                    Ok(())
                } else {
                    self.retry_attempts.lock().remove(&session_id);
                    self.mutate_session(session_id, |r| {
                        lifecycle::mark_terminal(r, TerminalReason::Failed(message.clone()), Utc::now());
                    })
                    .await?;
                    self.cleanup_terminal(session_id).await
                }
            }
            Err(other) => Err(other.into()),
        }
    }

    fn spawn_pipeline_consumer(
        self: &Arc<Self>,
        session_id: SessionId,
        _pipeline_id: PipelineId,
        mut events: mpsc::Receiver<PipelineEvent>,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let now = Utc::now();
                match event {
                    PipelineEvent::FirstSegment => {
                        let _ = this
                            .mutate_session(session_id, |r| lifecycle::record_first_segment(r, now))
                            .await;
                    }
                    PipelineEvent::PlayheadAdvanced => {
                        let _ = this
                            .mutate_session(session_id, |r| lifecycle::record_playhead_started(r, now))
                            .await;
                    }
                    PipelineEvent::Progress => {
                        let _ = this
                            .mutate_session(session_id, |r| lifecycle::record_progress(r, now))
                            .await;
                        this.bus
                            .publish(BusEvent::PipelineProgress { session_id }, "pipeline", now);
                    }
                    PipelineEvent::Error { class, message } => {
                        if class == FailureClass::Fatal {
                            let _ = this
                                .mutate_session(session_id, |r| {
                                    lifecycle::mark_terminal(r, TerminalReason::Failed(message.clone()), now);
                                })
                                .await;
                            this.scheduler.requeue_after(session_id, std::time::Duration::ZERO);
                        } else {
                            warn!(%session_id, %message, "retriable pipeline error observed mid-stream");
                            this.scheduler.requeue_after(session_id, std::time::Duration::from_secs(2));
                        }
                        break;
                    }
                    PipelineEvent::Stopped => break,
                }
            }
        });
    }

    /// Stops the victim within the configured window and marks it
    /// `preempted`; on failure to stop in time, leaves the victim running
    /// and undoes the stop request (§4.6 fail-closed preemption).
    #[instrument(skip(self), fields(%victim_id))]
    pub async fn preempt_victim(&self, victim_id: SessionId) -> Result<bool, RuntimeError> {
        let now = Utc::now();
        self.mutate_session(victim_id, |r| lifecycle::request_stop(r, now)).await?;

        let Some(record) = self.store.get_session(victim_id).await? else {
            return Ok(true);
        };

        let bound = self.config.pipeline_stop_timeout;
        let stop_result = if let Some(pipeline_id) = record.pipeline_id {
            tokio::time::timeout(bound, self.pipeline.stop(pipeline_id, bound)).await
        } else {
            Ok(Ok(()))
        };

        match stop_result {
            Ok(Ok(())) | Ok(Err(PipelineError::NotFound)) => {
                self.mutate_session(victim_id, |r| {
                    lifecycle::mark_terminal(r, TerminalReason::Preempted, Utc::now());
                })
                .await?;
                self.metrics.preempt_total.inc();
                self.cleanup_terminal(victim_id).await?;
                Ok(true)
            }
            _ => {
                self.mutate_session(victim_id, |r| {
                    r.stop_requested_at = None;
                })
                .await?;
                Ok(false)
            }
        }
    }

    /// Releases every resource a terminal session still holds: pipeline,
    /// tuner slot / GPU token, lease; publishes `session.terminated` exactly
    /// once (on the pass that actually found something to release).
    async fn cleanup_terminal(&self, session_id: SessionId) -> Result<(), RuntimeError> {
        let Some(record) = self.store.get_session(session_id).await? else {
            return Ok(());
        };
        if !record.is_terminal() {
            return Ok(());
        }

        let had_resources = record.pipeline_id.is_some()
            || record.tuner_slot.is_some()
            || record.gpu_token.is_some()
            || record.lease_owner.is_some();
        if !had_resources {
            return Ok(());
        }

        if let Some(pipeline_id) = record.pipeline_id {
            let _ = self.pipeline.stop(pipeline_id, self.config.pipeline_stop_timeout).await;
            let _ = self.store.delete_pipeline(pipeline_id).await;
        }

        self.lease_manager().release(&LeaseKey::for_session(session_id)).await?;

        self.mutate_session(session_id, |r| {
            r.pipeline_id = None;
            r.tuner_slot = None;
            r.gpu_token = None;
            r.lease_owner = None;
            r.lease_expiry = None;
        })
        .await?;

        self.retry_attempts.lock().remove(&session_id);

        let reason = record
            .terminal
            .as_ref()
            .map(|(reason, _)| terminal_reason_label(reason))
            .unwrap_or("unknown");
        self.bus.publish(
            BusEvent::SessionTerminated {
                session_id,
                reason: reason.to_string(),
            },
            "orchestrator",
            Utc::now(),
        );
        Ok(())
    }

    /// Load-mutate-CAS with a bounded retry count; every closure passed in
    /// must be idempotent, since a losing CAS re-applies it to a fresher
    /// read (every `lifecycle` helper satisfies this).
    pub(crate) async fn mutate_session(
        &self,
        session_id: SessionId,
        f: impl Fn(&mut SessionRecord),
    ) -> Result<(), RuntimeError> {
        for _ in 0..5 {
            let Some(mut record) = self.store.get_session(session_id).await? else {
                return Ok(());
            };
            let expected = record.generation;
            f(&mut record);
            record.touch();
            if self.store.cas_session(expected, record).await? {
                return Ok(());
            }
        }
        Err(RuntimeError::Store(StoreError::Conflict {
            key: session_id.to_string(),
        }))
    }
}
