//! Shared event envelope and bus.
//!
//! Replaces an "event emitter as superclass" pattern with explicit
//! per-component channels and a `subscribe(pattern) -> handle, cancel()`
//! surface. `EventBus` is that surface: every component (`ClusterRegistry`,
//! `LoadBalancer`, `TransparentProxy`, `RoleRegistry`, `MessageBus`,
//! `TaskStore`) holds a clone of the same bus and publishes its events onto
//! it. Subscribers filter by predicate rather than by a fixed topic string,
//! since callers often want more than one event kind (e.g. every
//! `migration:*`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

/// The union of control-plane event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ClusterRegistered,
    ClusterUnregistered,
    ClusterUpdated,
    ClusterStatusChanged,
    HealthStarted,
    HealthStopped,
    HealthChecked,
    HealthCheckFailed,
    HealthCycleCompleted,
    AgentSpawned,
    AgentKilled,
    AgentMigrated,
    MigrationStarted,
    MigrationCompleted,
    MigrationFailed,
    CleanupPending,
    RoleRegistered,
    RoleUnregistered,
    RoleUpdated,
    AssignmentAssigned,
    AssignmentUnassigned,
    Message,
    Urgent,
    Alert,
    Read,
    AllRead,
    Deleted,
    Broadcast,
    RoleMessage,
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TaskStatusChanged,
    ListUpdated,
}

/// An event carrying its kind, timestamp, the minimal set of ids it concerns,
/// and an opaque JSON payload for the kind-specific detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub ids: HashMap<String, String>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            ids: HashMap::new(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_id(mut self, key: &str, value: impl Into<String>) -> Self {
        self.ids.insert(key.to_string(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A live subscription. Dropping it (or calling `cancel`) unregisters the
/// receiver; the bus itself needs no bookkeeping since it is a thin wrapper
/// over `tokio::sync::broadcast`.
pub struct Subscription {
    rx: broadcast::Receiver<EventEnvelope>,
    filter: Box<dyn Fn(&EventEnvelope) -> bool + Send + Sync>,
}

impl Subscription {
    /// Wait for the next event matching this subscription's filter.
    /// Returns `None` once every publisher has been dropped.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.rx.recv().await {
                Ok(event) if (self.filter)(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Explicit cancellation; equivalent to dropping the subscription.
    pub fn cancel(self) {}
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Never fails: with no subscribers this is a no-op.
    pub fn publish(&self, event: EventEnvelope) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to every event matching `filter`.
    pub fn subscribe(
        &self,
        filter: impl Fn(&EventEnvelope) -> bool + Send + Sync + 'static,
    ) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: Box::new(filter),
        }
    }

    /// Subscribe to a single event kind.
    pub fn subscribe_kind(&self, kind: EventKind) -> Subscription {
        self.subscribe(move |e| e.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_only_sees_matching_kind() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_kind(EventKind::AgentSpawned);

        bus.publish(EventEnvelope::new(EventKind::AgentKilled));
        bus.publish(EventEnvelope::new(EventKind::AgentSpawned).with_id("agentId", "a1"));

        let event = sub.recv().await.expect("event delivered");
        assert_eq!(event.kind, EventKind::AgentSpawned);
        assert_eq!(event.ids.get("agentId").unwrap(), "a1");
    }

    #[tokio::test]
    async fn no_subscribers_does_not_error() {
        let bus = EventBus::default();
        bus.publish(EventEnvelope::new(EventKind::ClusterRegistered));
    }
}
