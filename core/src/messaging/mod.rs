//! Mailbox + `MessageBus` (C7): per-agent message queues and directed/
//! broadcast/by-role delivery.
//!
//! A mailbox-with-capacity-eviction shape; each mailbox here is
//! `tokio::sync::Mutex`-guarded so it processes one operation at a time,
//! while broadcasts fan out across mailboxes concurrently.

use crate::errors::{MailboxError, MailboxResult};
use crate::events::{EventBus, EventEnvelope, EventKind};
use crate::roles::RoleRegistry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

pub const BROADCAST_TARGET: &str = "broadcast";
pub const ROLE_TARGET_PREFIX: &str = "role:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Task,
    Status,
    Result,
    Alert,
    Query,
    Feedback,
    Message,
    System,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub sender_role: Option<String>,
    pub message_type: MessageType,
    pub content: String,
    pub payload: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub priority: MessagePriority,
    pub read: bool,
    pub read_at: Option<chrono::DateTime<chrono::Utc>>,
    pub reply_to: Option<String>,
    pub thread_id: Option<String>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl AgentMessage {
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| exp <= chrono::Utc::now()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailboxStats {
    pub total_received: u64,
    pub total_sent: u64,
    pub unread_count: u64,
    pub urgent_count: u64,
    pub per_type: HashMap<String, u64>,
    pub last_activity_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct Mailbox {
    agent_id: String,
    max_messages: usize,
    messages: Mutex<VecDeque<AgentMessage>>,
    stats: RwLock<MailboxStats>,
    events: EventBus,
}

impl Mailbox {
    fn new(agent_id: String, max_messages: usize, events: EventBus) -> Self {
        Self { agent_id, max_messages, messages: Mutex::new(VecDeque::new()), stats: RwLock::new(MailboxStats::default()), events }
    }

    /// Deliver one message, evicting the oldest if at capacity, dropping it
    /// outright if already expired.
    async fn deliver(&self, message: AgentMessage) {
        if message.is_expired() {
            return;
        }
        let mut messages = self.messages.lock().await;
        if messages.len() >= self.max_messages {
            messages.pop_front();
        }
        let priority = message.priority;
        let message_type = message.message_type;
        messages.push_back(message.clone());
        drop(messages);

        let mut stats = self.stats.write();
        stats.total_received += 1;
        stats.unread_count += 1;
        if priority >= MessagePriority::High {
            stats.urgent_count += 1;
        }
        *stats.per_type.entry(format!("{message_type:?}")).or_insert(0) += 1;
        stats.last_activity_at = Some(chrono::Utc::now());
        drop(stats);

        self.events
            .publish(EventEnvelope::new(EventKind::Message).with_id("agentId", self.agent_id.clone()).with_id("messageId", message.id.clone()));
        if priority >= MessagePriority::High {
            self.events.publish(EventEnvelope::new(EventKind::Urgent).with_id("agentId", self.agent_id.clone()));
        }
        if message_type == MessageType::Alert {
            self.events.publish(EventEnvelope::new(EventKind::Alert).with_id("agentId", self.agent_id.clone()));
        }
    }

    pub async fn list(&self) -> Vec<AgentMessage> {
        self.messages.lock().await.iter().cloned().collect()
    }

    pub async fn mark_read(&self, message_id: &str) -> bool {
        let mut messages = self.messages.lock().await;
        if let Some(m) = messages.iter_mut().find(|m| m.id == message_id) {
            if !m.read {
                m.read = true;
                m.read_at = Some(chrono::Utc::now());
                drop(messages);
                let mut stats = self.stats.write();
                stats.unread_count = stats.unread_count.saturating_sub(1);
                drop(stats);
                self.events.publish(EventEnvelope::new(EventKind::Read).with_id("agentId", self.agent_id.clone()).with_id("messageId", message_id));
                return true;
            }
            return true;
        }
        false
    }

    pub async fn mark_all_read(&self) {
        let mut messages = self.messages.lock().await;
        let now = chrono::Utc::now();
        for m in messages.iter_mut().filter(|m| !m.read) {
            m.read = true;
            m.read_at = Some(now);
        }
        drop(messages);
        self.stats.write().unread_count = 0;
        self.events.publish(EventEnvelope::new(EventKind::AllRead).with_id("agentId", self.agent_id.clone()));
    }

    pub async fn delete(&self, message_id: &str) -> bool {
        let mut messages = self.messages.lock().await;
        let before = messages.len();
        messages.retain(|m| m.id != message_id);
        let removed = messages.len() != before;
        drop(messages);
        if removed {
            self.events.publish(EventEnvelope::new(EventKind::Deleted).with_id("agentId", self.agent_id.clone()).with_id("messageId", message_id));
        }
        removed
    }

    pub fn stats(&self) -> MailboxStats {
        self.stats.read().clone()
    }

    /// Evict every expired message, decrementing unread count for the ones
    /// that were still unread.
    pub async fn cleanup_expired(&self) -> usize {
        let mut messages = self.messages.lock().await;
        let mut evicted_unread = 0;
        let before = messages.len();
        messages.retain(|m| {
            let expired = m.is_expired();
            if expired && !m.read {
                evicted_unread += 1;
            }
            !expired
        });
        let evicted = before - messages.len();
        drop(messages);
        if evicted_unread > 0 {
            let mut stats = self.stats.write();
            stats.unread_count = stats.unread_count.saturating_sub(evicted_unread as u64);
        }
        evicted
    }
}

/// Delivery tracking state machine, keyed by message id:
/// `{pending, delivered, read, failed}` with an attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Delivered,
    Read,
    Failed,
}

#[derive(Debug, Clone)]
struct DeliveryRecord {
    state: DeliveryState,
    attempts: u32,
    recipient: String,
}

#[derive(Default)]
pub struct DeliveryTracker {
    records: DashMap<String, DeliveryRecord>,
}

impl DeliveryTracker {
    pub fn start(&self, message_id: &str, recipient: &str) {
        self.records.insert(
            message_id.to_string(),
            DeliveryRecord { state: DeliveryState::Pending, attempts: 1, recipient: recipient.to_string() },
        );
    }

    pub fn mark_delivered(&self, message_id: &str) {
        if let Some(mut record) = self.records.get_mut(message_id) {
            record.state = DeliveryState::Delivered;
        }
    }

    pub fn mark_failed(&self, message_id: &str) {
        if let Some(mut record) = self.records.get_mut(message_id) {
            record.attempts += 1;
            record.state = DeliveryState::Failed;
        }
    }

    /// Moves a delivered message straight to `read`, as the sole recipient
    /// acknowledging it.
    pub fn mark_delivered_as_read(&self, message_id: &str, recipient: &str) -> bool {
        if let Some(mut record) = self.records.get_mut(message_id) {
            if record.recipient == recipient {
                record.state = DeliveryState::Read;
                return true;
            }
        }
        false
    }

    pub fn state_of(&self, message_id: &str) -> Option<DeliveryState> {
        self.records.get(message_id).map(|r| r.state)
    }
}

pub struct MessageBus {
    mailboxes: DashMap<String, Arc<Mailbox>>,
    roles: Arc<RoleRegistry>,
    /// agentId -> roleId, mirrored from the role registry for fast
    /// `sendToRole` fan-out without re-querying assignment state per send.
    role_of_agent: DashMap<String, String>,
    config: crate::config::MailboxConfig,
    events: EventBus,
    delivery: DeliveryTracker,
}

impl MessageBus {
    pub fn new(roles: Arc<RoleRegistry>, config: crate::config::MailboxConfig, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            mailboxes: DashMap::new(),
            roles,
            role_of_agent: DashMap::new(),
            config,
            events,
            delivery: DeliveryTracker::default(),
        })
    }

    pub fn register_agent(&self, agent_id: &str, role_id: Option<&str>) {
        self.mailboxes
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mailbox::new(agent_id.to_string(), self.config.max_messages, self.events.clone())));
        if let Some(role_id) = role_id {
            self.role_of_agent.insert(agent_id.to_string(), role_id.to_string());
        }
    }

    pub fn unregister_agent(&self, agent_id: &str) {
        self.mailboxes.remove(agent_id);
        self.role_of_agent.remove(agent_id);
    }

    pub fn mailbox(&self, agent_id: &str) -> Option<Arc<Mailbox>> {
        self.mailboxes.get(agent_id).map(|e| e.clone())
    }

    fn new_message(&self, from: &str, to: &str, message_type: MessageType, content: String, priority: MessagePriority) -> AgentMessage {
        AgentMessage {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            sender_role: self.role_of_agent.get(from).map(|r| r.clone()),
            message_type,
            content,
            payload: None,
            timestamp: chrono::Utc::now(),
            priority,
            read: false,
            read_at: None,
            reply_to: None,
            thread_id: None,
            expires_at: None,
        }
    }

    /// Directed send. Role-level `canMessage` permission is enforced unless
    /// sender and recipient are the same agent.
    #[instrument(skip(self, content))]
    pub async fn send(&self, from: &str, to: &str, message_type: MessageType, content: String, priority: MessagePriority) -> MailboxResult<String> {
        let recipient = self
            .mailboxes
            .get(to)
            .map(|e| e.clone())
            .ok_or_else(|| MailboxError::RecipientUnknown(to.to_string()))?;

        if from != to {
            if let (Some(from_role), Some(to_role)) = (self.role_of_agent.get(from), self.role_of_agent.get(to)) {
                if !self.roles.can_message(&from_role, &to_role) {
                    return Err(MailboxError::PermissionDenied(format!("{from_role} may not message {to_role}")));
                }
            }
        }

        let message = self.new_message(from, to, message_type, content, priority);
        let message_id = message.id.clone();
        if self.config.enable_delivery_tracking {
            self.delivery.start(&message_id, to);
        }
        recipient.deliver(message).await;
        if self.config.enable_delivery_tracking {
            self.delivery.mark_delivered(&message_id);
        }
        Ok(message_id)
    }

    /// Broadcast to every registered mailbox except the sender.
    pub async fn broadcast(&self, from: &str, content: String, priority: MessagePriority) -> usize {
        let targets: Vec<Arc<Mailbox>> = self
            .mailboxes
            .iter()
            .filter(|e| e.key() != from)
            .map(|e| e.value().clone())
            .collect();
        let count = targets.len();
        let deliveries = targets.into_iter().map(|mailbox| {
            let message = self.new_message(from, BROADCAST_TARGET, MessageType::Message, content.clone(), priority);
            async move { mailbox.deliver(message).await }
        });
        futures::future::join_all(deliveries).await;
        self.events.publish(EventEnvelope::new(EventKind::Broadcast).with_id("agentId", from));
        count
    }

    /// By-role send: delivered to every agent whose assignment maps to
    /// `role`. Returns the delivered count.
    pub async fn send_to_role(&self, from: &str, role: &str, content: String, priority: MessagePriority) -> usize {
        let targets: Vec<(String, Arc<Mailbox>)> = self
            .role_of_agent
            .iter()
            .filter(|e| e.value() == role)
            .filter_map(|e| self.mailboxes.get(e.key()).map(|m| (e.key().clone(), m.clone())))
            .collect();
        let count = targets.len();
        let deliveries = targets.into_iter().map(|(agent_id, mailbox)| {
            let message = self.new_message(from, &format!("{ROLE_TARGET_PREFIX}{role}"), MessageType::Message, content.clone(), priority);
            async move {
                let _ = agent_id;
                mailbox.deliver(message).await
            }
        });
        futures::future::join_all(deliveries).await;
        self.events
            .publish(EventEnvelope::new(EventKind::RoleMessage).with_id("agentId", from).with_payload(serde_json::json!({ "role": role, "delivered": count })));
        count
    }

    pub fn mark_delivered_as_read(&self, message_id: &str, recipient: &str) -> bool {
        self.delivery.mark_delivered_as_read(message_id, recipient)
    }

    pub fn delivery_state(&self, message_id: &str) -> Option<DeliveryState> {
        self.delivery.state_of(message_id)
    }

    /// Periodic sweep over every mailbox, evicting expired messages.
    pub async fn cleanup_expired(&self) {
        let mailboxes: Vec<Arc<Mailbox>> = self.mailboxes.iter().map(|e| e.value().clone()).collect();
        futures::future::join_all(mailboxes.iter().map(|m| m.cleanup_expired())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::RoleRegistry;

    fn make_bus() -> Arc<MessageBus> {
        let events = EventBus::default();
        let roles = RoleRegistry::new(events.clone());
        MessageBus::new(roles, crate::config::MailboxConfig { max_messages: 3, enable_delivery_tracking: true }, events)
    }

    #[tokio::test]
    async fn directed_send_requires_known_recipient() {
        let bus = make_bus();
        bus.register_agent("a", None);
        let result = bus.send("a", "ghost", MessageType::Message, "hi".into(), MessagePriority::Normal).await;
        assert!(matches!(result, Err(MailboxError::RecipientUnknown(_))));
    }

    #[tokio::test]
    async fn mailbox_evicts_oldest_past_capacity() {
        let bus = make_bus();
        bus.register_agent("a", None);
        bus.register_agent("b", None);
        for i in 0..4 {
            bus.send("a", "b", MessageType::Message, format!("msg-{i}"), MessagePriority::Normal).await.unwrap();
        }
        let messages = bus.mailbox("b").unwrap().list().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "msg-1");
    }

    #[tokio::test]
    async fn team_scenario_urgent_message_sets_unread_count() {
        let bus = make_bus();
        bus.register_agent("coordinator-1", Some("coordinator"));
        bus.register_agent("worker-1", Some("worker"));
        bus.send("worker-1", "coordinator-1", MessageType::Task, "status update".into(), MessagePriority::High)
            .await
            .unwrap();
        let stats = bus.mailbox("coordinator-1").unwrap().stats();
        assert_eq!(stats.unread_count, 1);
        assert_eq!(stats.urgent_count, 1);
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let bus = make_bus();
        bus.register_agent("a", None);
        bus.register_agent("b", None);
        bus.register_agent("c", None);
        let delivered = bus.broadcast("a", "hello".into(), MessagePriority::Normal).await;
        assert_eq!(delivered, 2);
        assert_eq!(bus.mailbox("a").unwrap().list().await.len(), 0);
    }
}
