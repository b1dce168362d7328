//! Agent and agent-snapshot data model shared by every federation component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel cluster id meaning "the local runtime", not a registered cluster.
pub const LOCAL_CLUSTER_ID: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Migrating,
    Terminated,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Terminated
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Pending => "pending",
            AgentStatus::Running => "running",
            AgentStatus::Paused => "paused",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Migrating => "migrating",
            AgentStatus::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// An agent known to the federation. `cluster_id` is `LOCAL_CLUSTER_ID` when
/// the agent is owned by the local runtime rather than a registered cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub cluster_id: String,
    pub status: AgentStatus,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub labels: HashMap<String, String>,
}

impl Agent {
    pub fn is_local(&self) -> bool {
        self.cluster_id == LOCAL_CLUSTER_ID
    }
}

/// Request to spawn a new agent, independent of which backend serves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub model: String,
    pub labels: HashMap<String, String>,
    pub requires_gpu: bool,
    pub gpu_type: Option<String>,
    pub env_vars: HashMap<String, String>,
    pub timeout_seconds: u64,
}

impl Default for SpawnRequest {
    fn default() -> Self {
        Self {
            model: String::new(),
            labels: HashMap::new(),
            requires_gpu: false,
            gpu_type: None,
            env_vars: HashMap::new(),
            timeout_seconds: 300,
        }
    }
}

/// The migration transfer unit (§3 AgentSnapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub state_data: Vec<u8>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub source_cluster: String,
}

/// One chunk of a streaming `ExecuteCommand` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecChunk {
    pub output: String,
    pub is_error: bool,
    pub exit_code: Option<i32>,
}

impl ExecChunk {
    pub fn is_terminal(&self) -> bool {
        self.exit_code.is_some()
    }
}

/// Snapshot of an agent's status as reported by its owning backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusReport {
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentListFilter {
    pub status: Option<AgentStatus>,
    pub label_selector: HashMap<String, String>,
}

impl AgentListFilter {
    pub fn matches(&self, agent: &Agent) -> bool {
        if let Some(status) = self.status {
            if agent.status != status {
                return false;
            }
        }
        self.label_selector
            .iter()
            .all(|(k, v)| agent.labels.get(k) == Some(v))
    }
}
