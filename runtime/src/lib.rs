//! Process-based `LocalRuntime`: agents backed by real OS processes on this
//! host rather than table entries.
//!
//! Generalizes a single-task worker process (spawn a process to run one
//! task, capture its output, report completion) into the `LocalRuntime`
//! trait `orchestrator-core` defines for C3: one agent here is a registered
//! slot the balancer can route work to; `exec` runs a command against it as
//! a child process and returns its captured output and exit code, the same
//! shape `ClusterClient::execute_command` uses for a remote cluster.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use orchestrator_core::agent::{Agent, AgentListFilter, AgentStatus, SpawnRequest, LOCAL_CLUSTER_ID};
use orchestrator_core::errors::LocalRuntimeError;
use orchestrator_core::local_runtime::{LocalRuntime, LocalRuntimeResult};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::info;

struct AgentSlot {
    agent: Agent,
}

/// Each `exec` call runs `sh -c <cmd>` to completion and returns its output;
/// there is no long-lived child process held between calls, so `kill` only
/// has to drop the slot (a command already in flight finishes on its own).
pub struct ProcessRuntime {
    agents: DashMap<String, Mutex<AgentSlot>>,
    capacity: u32,
    next_id: AtomicU64,
}

impl ProcessRuntime {
    pub fn new(capacity: u32) -> Arc<Self> {
        Arc::new(Self { agents: DashMap::new(), capacity, next_id: AtomicU64::new(1) })
    }
}

#[async_trait]
impl LocalRuntime for ProcessRuntime {
    async fn spawn(&self, req: SpawnRequest) -> LocalRuntimeResult<Agent> {
        if self.agents.len() as u32 >= self.capacity {
            return Err(LocalRuntimeError::LocalResourceExhausted(
                "process runtime at capacity".to_string(),
            ));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let agent = Agent {
            id: format!("proc-{n}"),
            cluster_id: LOCAL_CLUSTER_ID.to_string(),
            status: AgentStatus::Running,
            model: req.model,
            started_at: Utc::now(),
            labels: req.labels,
        };
        self.agents.insert(agent.id.clone(), Mutex::new(AgentSlot { agent: agent.clone() }));
        info!(agent_id = %agent.id, "reserved process-backed agent slot");
        Ok(agent)
    }

    async fn exec(&self, agent_id: &str, cmd: &str) -> LocalRuntimeResult<(String, i32)> {
        if !self.agents.contains_key(agent_id) {
            return Err(LocalRuntimeError::NotFound(agent_id.to_string()));
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LocalRuntimeError::Io(format!("spawning command for {agent_id}: {e}")))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(mut pipe) = child.stdout.take() {
            let _ = pipe.read_to_end(&mut stdout).await;
        }
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_end(&mut stderr).await;
        }
        let status = child
            .wait()
            .await
            .map_err(|e| LocalRuntimeError::Io(format!("waiting on command for {agent_id}: {e}")))?;

        let mut combined = String::from_utf8_lossy(&stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&stderr));
        Ok((combined, status.code().unwrap_or(-1)))
    }

    async fn kill(&self, agent_id: &str) -> LocalRuntimeResult<()> {
        self.agents.remove(agent_id);
        Ok(())
    }

    async fn list(&self, filter: &AgentListFilter) -> LocalRuntimeResult<Vec<Agent>> {
        let mut out = Vec::new();
        for entry in self.agents.iter() {
            let slot = entry.value().lock().await;
            if filter.matches(&slot.agent) {
                out.push(slot.agent.clone());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_past_capacity_is_resource_exhausted() {
        let runtime = ProcessRuntime::new(1);
        runtime.spawn(SpawnRequest::default()).await.unwrap();
        let err = runtime.spawn(SpawnRequest::default()).await.unwrap_err();
        assert!(matches!(err, LocalRuntimeError::LocalResourceExhausted(_)));
    }

    #[tokio::test]
    async fn exec_runs_a_real_command() {
        let runtime = ProcessRuntime::new(4);
        let agent = runtime.spawn(SpawnRequest::default()).await.unwrap();
        let (output, code) = runtime.exec(&agent.id, "echo hello").await.unwrap();
        assert_eq!(code, 0);
        assert!(output.contains("hello"));
    }

    #[tokio::test]
    async fn exec_against_unknown_agent_is_not_found() {
        let runtime = ProcessRuntime::new(4);
        let err = runtime.exec("missing", "echo hi").await.unwrap_err();
        assert!(matches!(err, LocalRuntimeError::NotFound(_)));
    }

    #[tokio::test]
    async fn kill_removes_the_agent_from_listing() {
        let runtime = ProcessRuntime::new(4);
        let agent = runtime.spawn(SpawnRequest::default()).await.unwrap();
        runtime.kill(&agent.id).await.unwrap();
        let listed = runtime.list(&AgentListFilter::default()).await.unwrap();
        assert!(listed.is_empty());
    }
}
