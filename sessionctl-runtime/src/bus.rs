use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sessionctl_core::{CapacitySnapshot, SessionId};
use tokio::sync::broadcast;

use crate::metrics::Metrics;

/// In-process publish/subscribe events (§4.2). Topic is implied by the
/// variant, matching the spec's `(topic, payload, ts, producer)` shape with
/// the topic folded into the type instead of a bare string.
#[derive(Debug, Clone)]
pub enum BusEvent {
    IntentAccepted { session_id: SessionId },
    StopRequested { session_id: SessionId },
    SessionTerminated { session_id: SessionId, reason: String },
    CapacityChanged(CapacitySnapshot),
    PipelineProgress { session_id: SessionId },
}

impl BusEvent {
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::IntentAccepted { .. } => "intent.accepted",
            Self::StopRequested { .. } => "intent.stop_requested",
            Self::SessionTerminated { .. } => "session.terminated",
            Self::CapacityChanged(_) => "capacity.changed",
            Self::PipelineProgress { .. } => "pipeline.progress",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusMessage {
    pub event: BusEvent,
    pub ts: DateTime<Utc>,
    pub producer: String,
}

/// One `broadcast` channel per topic, created lazily on first publish or
/// subscribe. At least one live subscriber is required for the orchestrator
/// to make progress (§4.2); publishing to a topic with no subscribers is not
/// an error — the message is simply never observed.
pub struct EventBus {
    channels: RwLock<HashMap<&'static str, broadcast::Sender<Arc<BusMessage>>>>,
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
            metrics,
        }
    }

    fn sender_for(&self, topic: &'static str) -> broadcast::Sender<Arc<BusMessage>> {
        if let Some(tx) = self.channels.read().get(topic) {
            return tx.clone();
        }
        let mut guard = self.channels.write();
        guard
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish takes a `now` so tests can drive it deterministically.
    pub fn publish(&self, event: BusEvent, producer: &str, now: DateTime<Utc>) {
        let topic = event.topic();
        let message = Arc::new(BusMessage {
            event,
            ts: now,
            producer: producer.to_string(),
        });
        // `broadcast::Sender::send` never blocks; with no live subscribers it
        // returns an error we intentionally ignore (§4.2: no subscriber means
        // no one observes the event, not a fault).
        let _ = self.sender_for(topic).send(message);
    }

    #[must_use]
    pub fn subscribe(&self, topic: &'static str) -> BusSubscription {
        BusSubscription {
            rx: self.sender_for(topic).subscribe(),
            metrics: self.metrics.clone(),
        }
    }
}

/// A subscriber's view of one topic.
///
/// `tokio::sync::broadcast` does not block a slow producer; instead a lagging
/// receiver observes `RecvError::Lagged(n)` where the spec's "producer blocks
/// then records a drop" would apply. We treat a lagged receive as the bus's
/// realization of that drop event and count it under the `bus_drop`
/// invariant rather than surface it to the caller as an error.
pub struct BusSubscription {
    rx: broadcast::Receiver<Arc<BusMessage>>,
    metrics: Arc<Metrics>,
}

impl BusSubscription {
    pub async fn recv(&mut self) -> Option<Arc<BusMessage>> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.metrics
                        .invariant_violation_total
                        .with_label_values(&["bus_drop"])
                        .inc_by(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
