//! Re-broadcasts the core `EventBus` over a ZMQ PUB socket.
//!
//! Grounded on the teacher's `ZmqPublisher` (chat-output streaming over
//! ZMQ PUB/SUB, topic = session id). Here the topic is the event kind
//! (`"cluster:status_changed"`, `"migration:completed"`, ...) so subscribers
//! can filter the way spec §6's event catalog is organized, and the payload
//! is the control plane's own `EventEnvelope` instead of a chat chunk.

use orchestrator_core::events::{EventBus, EventEnvelope, EventKind};
use std::sync::Arc;
use tokio::sync::Mutex;
use zeromq::{PubSocket, Socket, SocketSend, ZmqMessage};

fn topic_for(kind: EventKind) -> &'static str {
    match kind {
        EventKind::ClusterRegistered => "cluster:registered",
        EventKind::ClusterUnregistered => "cluster:unregistered",
        EventKind::ClusterUpdated => "cluster:updated",
        EventKind::ClusterStatusChanged => "cluster:status_changed",
        EventKind::HealthStarted => "health:started",
        EventKind::HealthStopped => "health:stopped",
        EventKind::HealthChecked => "health:checked",
        EventKind::HealthCheckFailed => "health:check_failed",
        EventKind::HealthCycleCompleted => "health:cycle_completed",
        EventKind::AgentSpawned => "agent:spawned",
        EventKind::AgentKilled => "agent:killed",
        EventKind::AgentMigrated => "agent:migrated",
        EventKind::MigrationStarted => "migration:started",
        EventKind::MigrationCompleted => "migration:completed",
        EventKind::MigrationFailed => "migration:failed",
        EventKind::CleanupPending => "cleanup:pending",
        EventKind::RoleRegistered => "role:registered",
        EventKind::RoleUnregistered => "role:unregistered",
        EventKind::RoleUpdated => "role:updated",
        EventKind::AssignmentAssigned => "assignment:assigned",
        EventKind::AssignmentUnassigned => "assignment:unassigned",
        EventKind::Message => "message",
        EventKind::Urgent => "urgent",
        EventKind::Alert => "alert",
        EventKind::Read => "read",
        EventKind::AllRead => "all-read",
        EventKind::Deleted => "deleted",
        EventKind::Broadcast => "broadcast",
        EventKind::RoleMessage => "role-message",
        EventKind::TaskCreated => "task:created",
        EventKind::TaskUpdated => "task:updated",
        EventKind::TaskDeleted => "task:deleted",
        EventKind::TaskStatusChanged => "task:statusChanged",
        EventKind::ListUpdated => "task:list:updated",
    }
}

pub struct EventPublisher {
    socket: Mutex<PubSocket>,
    endpoint: String,
}

impl EventPublisher {
    pub async fn bind(addr: &str, port: u16) -> Result<Self, String> {
        let endpoint = format!("tcp://{addr}:{port}");
        let mut socket = PubSocket::new();
        socket
            .bind(&endpoint)
            .await
            .map_err(|e| format!("failed to bind PUB socket to {endpoint}: {e}"))?;
        tracing::info!(%endpoint, "event publisher listening");
        Ok(Self { socket: Mutex::new(socket), endpoint })
    }

    pub async fn publish(&self, event: &EventEnvelope) -> Result<(), String> {
        let topic = topic_for(event.kind);
        let payload = serde_json::to_string(event).map_err(|e| format!("serialization error: {e}"))?;
        let message = format!("{topic} {payload}");
        let zmq_msg: ZmqMessage = message.into_bytes().into();
        self.socket
            .lock()
            .await
            .send(zmq_msg)
            .await
            .map_err(|e| format!("failed to publish event: {e}"))?;
        tracing::trace!(topic, "published event");
        Ok(())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Drain `bus` forever, publishing every event. Meant to be
    /// `tokio::spawn`-ed once at daemon startup; returns once every
    /// publisher on the bus has been dropped.
    pub async fn forward_forever(self: Arc<Self>, bus: EventBus) {
        let mut sub = bus.subscribe(|_| true);
        while let Some(event) = sub.recv().await {
            if let Err(e) = self.publish(&event).await {
                tracing::warn!(error = %e, "dropping event: publish failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_naming_matches_event_catalog() {
        assert_eq!(topic_for(EventKind::MigrationCompleted), "migration:completed");
        assert_eq!(topic_for(EventKind::AllRead), "all-read");
    }

    #[tokio::test]
    async fn forwards_published_events_without_panicking() {
        let publisher = Arc::new(EventPublisher::bind("127.0.0.1", 0).await.unwrap());
        let bus = EventBus::default();
        let handle = tokio::spawn(publisher.clone().forward_forever(bus.clone()));

        bus.publish(EventEnvelope::new(EventKind::AgentSpawned));
        drop(bus);
        let _ = tokio::time::timeout(std::time::Duration::from_millis(200), handle).await;
    }
}
