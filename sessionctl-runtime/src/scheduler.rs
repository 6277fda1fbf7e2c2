use std::collections::HashMap;

use futures::StreamExt;
use sessionctl_core::SessionId;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::time::delay_queue::{self, DelayQueue};

/// A request to re-evaluate `session_id` at `run_at`, deduplicated against
/// any already-pending request for the same session.
///
/// Grounded on the teacher's `scheduler::ScheduleRequest` /
/// `debounced_scheduler`, narrowed from a generic `Stream` transformer to a
/// single spawned task keyed by `SessionId`, since the orchestrator only
/// ever needs "re-run this session later" rather than an arbitrary message
/// type (§4.6 `[AMBIENT]`).
#[derive(Debug)]
struct ScheduleRequest {
    session_id: SessionId,
    run_at: Instant,
}

struct ScheduledEntry {
    run_at: Instant,
    key: delay_queue::Key,
}

/// Handle used by orchestrator workers to requeue a session for a later
/// reconciliation attempt (retry backoff, stall re-checks, heartbeat
/// cadence). The queue itself runs as a background task; cloning this
/// handle is cheap (it's just a channel sender).
#[derive(Clone)]
pub struct RequeueScheduler {
    requests: mpsc::UnboundedSender<ScheduleRequest>,
}

impl RequeueScheduler {
    /// Spawns the queue task and returns the handle plus the channel of
    /// session ids that became due.
    #[must_use]
    pub fn spawn() -> (Self, mpsc::Receiver<SessionId>) {
        let (requests_tx, mut requests_rx) = mpsc::unbounded_channel::<ScheduleRequest>();
        let (ready_tx, ready_rx) = mpsc::channel::<SessionId>(1024);

        tokio::spawn(async move {
            let mut queue: DelayQueue<SessionId> = DelayQueue::new();
            let mut scheduled: HashMap<SessionId, ScheduledEntry> = HashMap::new();

            loop {
                tokio::select! {
                    request = requests_rx.recv() => {
                        let Some(request) = request else { break };
                        match scheduled.get_mut(&request.session_id) {
                            // Earlier request already pending and still earlier: ignore.
                            Some(entry) if entry.run_at <= request.run_at => {}
                            Some(entry) => {
                                queue.reset_at(&entry.key, request.run_at);
                                entry.run_at = request.run_at;
                            }
                            None => {
                                let key = queue.insert_at(request.session_id, request.run_at);
                                scheduled.insert(request.session_id, ScheduledEntry { run_at: request.run_at, key });
                            }
                        }
                    }
                    expired = queue.next(), if !queue.is_empty() => {
                        let Some(Ok(entry)) = expired else { continue };
                        let session_id = entry.into_inner();
                        scheduled.remove(&session_id);
                        if ready_tx.send(session_id).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        (Self { requests: requests_tx }, ready_rx)
    }

    pub fn requeue_at(&self, session_id: SessionId, run_at: Instant) {
        let _ = self.requests.send(ScheduleRequest { session_id, run_at });
    }

    pub fn requeue_after(&self, session_id: SessionId, delay: Duration) {
        self.requeue_at(session_id, Instant::now() + delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn requeue_emits_after_the_requested_delay() {
        let (scheduler, mut ready) = RequeueScheduler::spawn();
        let id = SessionId::new();
        scheduler.requeue_after(id, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(tokio::time::timeout(Duration::from_millis(10), ready.recv())
            .await
            .is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        let due = tokio::time::timeout(Duration::from_millis(10), ready.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(due, id);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_requeue_keeps_the_earlier_deadline() {
        let (scheduler, mut ready) = RequeueScheduler::spawn();
        let id = SessionId::new();
        scheduler.requeue_after(id, Duration::from_secs(10));
        scheduler.requeue_after(id, Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(3)).await;
        let due = tokio::time::timeout(Duration::from_millis(10), ready.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(due, id);
    }
}
