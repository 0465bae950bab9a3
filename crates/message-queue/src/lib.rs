//! Subscription registry and notification fan-out.
//!
//! The enforcement service publishes a `NotificationEvent` after every
//! `append`/`seal_outcome`; subscribers (typically a `/ws` connection
//! scoped to one session) receive events over a bounded, per-subscriber
//! `broadcast` channel. `broadcast`'s ring buffer is what gives us real
//! drop-oldest semantics for free: a slow subscriber's next `recv()`
//! returns `Lagged(n)` and then resumes from the oldest event still held
//! in the buffer — the publisher never blocks and never tracks queue
//! occupancy itself. The audit log remains the source of truth; a
//! reconnecting client reconciles by paginating it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use reaper_core::entry::{EntryId, LogEntry, SessionId};
use tokio::sync::broadcast;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Per-subscriber ring buffer capacity. Chosen generously enough to
/// absorb a short burst without losing events under normal load.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

pub type SubscriptionId = Uuid;

#[derive(Debug, Clone)]
pub enum NotificationEvent {
    Decision { entry: LogEntry },
    Result { entry_id: EntryId, session_id: SessionId },
}

struct Subscriber {
    /// `None` means this subscriber receives events for every session —
    /// the global `/ws` topology the push channel's contract allows
    /// alongside the per-session `/ws/{session_id}` one.
    session_filter: Option<SessionId>,
    sender: broadcast::Sender<NotificationEvent>,
    dropped: Arc<AtomicU64>,
}

/// Transient, in-memory only — never persisted, matching the domain
/// model's note that `Subscription` rows live solely in this registry.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscribers: DashMap<SubscriptionId, Subscriber>,
}

pub struct Subscription {
    pub id: SubscriptionId,
    receiver: broadcast::Receiver<NotificationEvent>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    /// Awaits the next event, transparently skipping past any `Lagged`
    /// gap (recording it) rather than surfacing the gap to the caller —
    /// a `/ws` handler just wants the next event, not a skip count.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped.fetch_add(skipped, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking counterpart to `recv`, used by tests that want to
    /// drain whatever is currently buffered.
    pub fn try_recv(&mut self) -> Result<NotificationEvent, broadcast::error::TryRecvError> {
        loop {
            match self.receiver.try_recv() {
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.dropped.fetch_add(skipped, Ordering::Relaxed);
                    continue;
                }
                other => return other,
            }
        }
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber scoped to `session_id`. Returns the
    /// receiving half of a bounded channel; the caller (typically a `/ws`
    /// handler) owns it for the life of the connection.
    #[instrument(skip(self))]
    pub fn subscribe(&self, session_id: SessionId) -> Subscription {
        self.subscribe_filtered(Some(session_id))
    }

    /// Registers a subscriber interested in every session — backs the
    /// global `/ws` endpoint. `subscribe` is a thin wrapper over this with
    /// a concrete filter.
    #[instrument(skip(self))]
    pub fn subscribe_filtered(&self, session_filter: Option<SessionId>) -> Subscription {
        let (tx, rx) = broadcast::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = Uuid::new_v4();
        let dropped = Arc::new(AtomicU64::new(0));
        self.subscribers.insert(
            id,
            Subscriber {
                session_filter,
                sender: tx,
                dropped: dropped.clone(),
            },
        );
        Subscription {
            id,
            receiver: rx,
            dropped,
        }
    }

    pub fn unsubscribe(&self, id: &SubscriptionId) {
        self.subscribers.remove(id);
    }

    /// Publishes an event to every subscriber of `session_id`. `send`
    /// never blocks: a subscriber's ring buffer silently overwrites its
    /// oldest slot once full, and a subscriber with zero live receivers
    /// (already disconnected, not yet reaped) just yields a harmless
    /// "no receivers" error we ignore here.
    #[instrument(skip(self, event), fields(session_id = %session_id))]
    pub fn publish(&self, session_id: &SessionId, event: NotificationEvent) {
        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            match &subscriber.session_filter {
                Some(filter) if filter != session_id => continue,
                _ => {}
            }
            if subscriber.sender.send(event.clone()).is_err() {
                debug!(subscription_id = %entry.key(), "subscriber channel has no active receiver");
            }
        }
    }

    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.subscribers
            .iter()
            .filter(|e| match &e.value().session_filter {
                Some(filter) => filter == session_id,
                None => true,
            })
            .count()
    }

    pub fn dropped_count(&self, id: &SubscriptionId) -> u64 {
        self.subscribers
            .get(id)
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_core::policy::Decision;
    use chrono::Utc;

    fn sample_entry(session_id: &str) -> LogEntry {
        LogEntry {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            seq_index: 0,
            timestamp: Utc::now(),
            tool_name: "read_file".to_string(),
            tool_args: serde_json::json!({}),
            policy_version_label: "v1".to_string(),
            decision: Decision::Allow,
            rule_name: None,
            reason: "matched".to_string(),
            status: reaper_core::entry::OutcomeStatus::Pending,
            outcome: None,
            error_message: None,
            duration_ms: None,
            prev_hash: reaper_core::GENESIS_HASH.to_string(),
            own_hash: "deadbeef".to_string(),
            bypass: false,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_events_for_its_session() {
        let registry = SubscriptionRegistry::new();
        let mut subscription = registry.subscribe("s1".to_string());

        registry.publish(
            &"s1".to_string(),
            NotificationEvent::Decision {
                entry: sample_entry("s1"),
            },
        );
        registry.publish(
            &"s2".to_string(),
            NotificationEvent::Decision {
                entry: sample_entry("s2"),
            },
        );

        let received = subscription.recv().await.unwrap();
        match received {
            NotificationEvent::Decision { entry } => assert_eq!(entry.session_id, "s1"),
            _ => panic!("expected a decision event"),
        }
        assert!(subscription.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_instead_of_blocking() {
        let registry = SubscriptionRegistry::new();
        let mut subscription = registry.subscribe("s1".to_string());

        for _ in 0..(SUBSCRIBER_QUEUE_CAPACITY + 5) {
            registry.publish(
                &"s1".to_string(),
                NotificationEvent::Decision {
                    entry: sample_entry("s1"),
                },
            );
        }

        // Draining triggers lag detection; only the newest CAPACITY events
        // survived the ring buffer, the rest were silently overwritten.
        let mut received = 0u64;
        while subscription.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE_CAPACITY as u64);
        assert_eq!(registry.dropped_count(&subscription.id), 5);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_delivery() {
        let registry = SubscriptionRegistry::new();
        let subscription = registry.subscribe("s1".to_string());
        registry.unsubscribe(&subscription.id);
        assert_eq!(registry.subscriber_count(&"s1".to_string()), 0);
    }
}
