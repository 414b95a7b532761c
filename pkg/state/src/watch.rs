use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast;

/// Type of event in the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Put,
    Delete,
}

/// A single watch event representing a state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

impl WatchEvent {
    /// Namespace segment of a `/registry/<plural>/<namespace>/<name>` key.
    pub fn namespace(&self) -> Option<&str> {
        let rest = self.key.strip_prefix(pkg_constants::state::REGISTRY_PREFIX)?;
        let mut parts = rest.splitn(3, '/');
        let _plural = parts.next()?;
        let ns = parts.next()?;
        parts.next()?;
        Some(ns)
    }
}

/// In-memory event log that tracks all store mutations with monotonic sequence numbers.
/// Delivery is at-least-once and possibly lossy for slow subscribers: a lagging
/// receiver must fall back to a full resync.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<RwLock<EventLogInner>>,
    sender: broadcast::Sender<WatchEvent>,
}

struct EventLogInner {
    seq: u64,
    /// Ring buffer of recent events (capped)
    events: VecDeque<WatchEvent>,
    max_events: usize,
}

impl EventLog {
    /// Create a new event log with the given capacity for recent events.
    pub fn new(max_events: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RwLock::new(EventLogInner {
                seq: 0,
                events: VecDeque::with_capacity(max_events),
                max_events,
            })),
            sender,
        }
    }

    /// Record a new event. Called by the stores after a successful write.
    pub async fn emit(&self, event_type: EventType, key: String, value: Option<Vec<u8>>) {
        let mut inner = self.inner.write().await;
        inner.seq += 1;
        let event = WatchEvent {
            seq: inner.seq,
            event_type,
            key,
            value,
        };
        if inner.events.len() >= inner.max_events {
            inner.events.pop_front();
        }
        inner.events.push_back(event.clone());
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    pub async fn current_seq(&self) -> u64 {
        self.inner.read().await.seq
    }

    /// Get all retained events since the given sequence number.
    pub async fn events_since(&self, from_seq: u64) -> Vec<WatchEvent> {
        let inner = self.inner.read().await;
        inner
            .events
            .iter()
            .filter(|e| e.seq > from_seq)
            .cloned()
            .collect()
    }

    /// Subscribe to receive new events as they are emitted.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ring_buffer_drops_oldest() {
        let log = EventLog::new(2);
        for i in 0..3 {
            log.emit(EventType::Put, format!("/registry/x/_/{}", i), None)
                .await;
        }
        let events = log.events_since(0).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 2);
        assert_eq!(log.current_seq().await, 3);
    }

    #[tokio::test]
    async fn subscribers_see_new_events() {
        let log = EventLog::new(8);
        let mut rx = log.subscribe();
        log.emit(
            EventType::Delete,
            "/registry/virtualmachineinstances/default/vm-1".into(),
            None,
        )
        .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Delete);
        assert_eq!(event.namespace(), Some("default"));
    }

    #[test]
    fn namespace_requires_full_key() {
        let event = WatchEvent {
            seq: 1,
            event_type: EventType::Put,
            key: "/registry/clusterroles/_/virtrs-admin".into(),
            value: None,
        };
        assert_eq!(event.namespace(), Some("_"));
        let short = WatchEvent {
            key: "/registry/clusterroles/".into(),
            ..event
        };
        assert_eq!(short.namespace(), None);
    }
}
