//! `LocalRuntime` (C3): the local-host backend, same operation surface as
//! `ClusterClient` but never reached over the wire.
//!
//! The real local runtime (spawning OS processes on this host) lives in the
//! `orchestrator-runtime` binary; this module defines the contract the core
//! depends on plus an in-process implementation used by balancer/proxy tests
//! and as a fallback when no process-backed runtime is configured.

use crate::agent::{Agent, AgentListFilter, AgentStatus, SpawnRequest};
use crate::errors::LocalRuntimeError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub type LocalRuntimeResult<T> = Result<T, LocalRuntimeError>;

#[async_trait]
pub trait LocalRuntime: Send + Sync {
    async fn spawn(&self, req: SpawnRequest) -> LocalRuntimeResult<Agent>;
    async fn exec(&self, agent_id: &str, cmd: &str) -> LocalRuntimeResult<(String, i32)>;
    async fn kill(&self, agent_id: &str) -> LocalRuntimeResult<()>;
    async fn list(&self, filter: &AgentListFilter) -> LocalRuntimeResult<Vec<Agent>>;
}

/// In-process runtime: agents are table entries, not processes. Used where a
/// real `orchestrator-runtime` process is unavailable (unit tests, the
/// balancer's local-fallback path when no runtime binary is configured).
pub struct InProcessRuntime {
    agents: DashMap<String, Agent>,
    capacity: u32,
    next_id: AtomicU64,
}

impl InProcessRuntime {
    pub fn new(capacity: u32) -> Arc<Self> {
        Arc::new(Self {
            agents: DashMap::new(),
            capacity,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl LocalRuntime for InProcessRuntime {
    async fn spawn(&self, req: SpawnRequest) -> LocalRuntimeResult<Agent> {
        if self.agents.len() as u32 >= self.capacity {
            return Err(LocalRuntimeError::LocalResourceExhausted(
                "local runtime at capacity".to_string(),
            ));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let agent = Agent {
            id: format!("local-{n}"),
            cluster_id: crate::agent::LOCAL_CLUSTER_ID.to_string(),
            status: AgentStatus::Running,
            model: req.model,
            started_at: Utc::now(),
            labels: req.labels,
        };
        self.agents.insert(agent.id.clone(), agent.clone());
        Ok(agent)
    }

    async fn exec(&self, agent_id: &str, cmd: &str) -> LocalRuntimeResult<(String, i32)> {
        if !self.agents.contains_key(agent_id) {
            return Err(LocalRuntimeError::NotFound(agent_id.to_string()));
        }
        Ok((format!("ran: {cmd}"), 0))
    }

    async fn kill(&self, agent_id: &str) -> LocalRuntimeResult<()> {
        self.agents.remove(agent_id);
        Ok(())
    }

    async fn list(&self, filter: &AgentListFilter) -> LocalRuntimeResult<Vec<Agent>> {
        Ok(self
            .agents
            .iter()
            .map(|e| e.value().clone())
            .filter(|a| filter.matches(a))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_past_capacity_is_resource_exhausted() {
        let runtime = InProcessRuntime::new(1);
        runtime.spawn(SpawnRequest::default()).await.unwrap();
        let err = runtime.spawn(SpawnRequest::default()).await.unwrap_err();
        assert!(matches!(err, LocalRuntimeError::LocalResourceExhausted(_)));
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let runtime = InProcessRuntime::new(4);
        let agent = runtime.spawn(SpawnRequest::default()).await.unwrap();
        runtime.kill(&agent.id).await.unwrap();
        runtime.kill(&agent.id).await.unwrap();
    }
}
