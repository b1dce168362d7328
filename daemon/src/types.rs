//! JSON-RPC 2.0 envelope types and per-method request/response DTOs.
//!
//! The envelope (`RpcRequest`/`RpcResponse`/`RpcError`) is standard
//! JSON-RPC 2.0. The per-method structs below cover the
//! federation/role/messaging/task-graph operations this control plane
//! exposes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
    #[serde(skip)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    pub fn success(result: serde_json::Value, id: Option<serde_json::Value>) -> Self {
        Self { jsonrpc: "2.0".to_string(), result: Some(result), error: None, id }
    }

    pub fn error(code: i64, message: String, id: Option<serde_json::Value>) -> Self {
        Self { jsonrpc: "2.0".to_string(), result: None, error: Some(RpcError { code, message, data: None }), id }
    }
}

// ---------------------------------------------------------------------
// cluster.*
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterRegisterParams {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub max_agents: u32,
    #[serde(default)]
    pub gpu_enabled: bool,
    #[serde(default)]
    pub gpu_types: Vec<String>,
    #[serde(default)]
    pub cost_per_hour: f64,
    #[serde(default)]
    pub latency_ms: f64,
    /// Connect a live `ZmqClusterTransport` to `endpoint` when true; tests
    /// and local demos register a `MockClusterClient` out of band instead
    /// and pass `false` here.
    #[serde(default = "default_true")]
    pub connect: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterUnregisterParams {
    pub cluster_id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClusterSelectParams {
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub min_agents: u32,
    #[serde(default)]
    pub requires_gpu: bool,
    #[serde(default)]
    pub gpu_type: Option<String>,
    #[serde(default)]
    pub max_latency_ms: Option<f64>,
    #[serde(default)]
    pub max_cost_per_hour: Option<f64>,
}

// ---------------------------------------------------------------------
// agent.*
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentSpawnParams {
    pub model: String,
    #[serde(default)]
    pub requires_gpu: bool,
    #[serde(default)]
    pub gpu_type: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub prefer_local: bool,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    #[serde(default)]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentIdParams {
    pub agent_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentExecParams {
    pub agent_id: String,
    pub command: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentExecResult {
    pub output: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentKillParams {
    pub agent_id: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentListParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub label_selector: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentMigrateParams {
    pub agent_id: String,
    pub to_cluster: String,
}

// ---------------------------------------------------------------------
// role.*
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RoleRegisterParams {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub can_message: Vec<String>,
    #[serde(default)]
    pub cost_budget: Option<f64>,
}

fn default_max_iterations() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleIdParams {
    pub role_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleAssignParams {
    pub agent_id: String,
    pub role_id: String,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub worktree_id: Option<String>,
    #[serde(default = "default_assigned_by")]
    pub assigned_by: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_assigned_by() -> String {
    "system".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposeTeamParams {
    pub task: String,
    #[serde(default = "default_complexity")]
    pub complexity: String,
    #[serde(default = "default_one")]
    pub estimated_subtasks: u32,
    #[serde(default)]
    pub security_sensitive: bool,
    #[serde(default)]
    pub requires_review: bool,
    #[serde(default)]
    pub requires_monitoring: bool,
    #[serde(default)]
    pub requires_integration: bool,
}

fn default_complexity() -> String {
    "medium".to_string()
}

fn default_one() -> u32 {
    1
}

// ---------------------------------------------------------------------
// message.*
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSendParams {
    pub from: String,
    pub to: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    pub content: String,
    #[serde(default = "default_priority")]
    pub priority: String,
}

fn default_message_type() -> String {
    "message".to_string()
}

fn default_priority() -> String {
    "normal".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageBroadcastParams {
    pub from: String,
    pub content: String,
    #[serde(default = "default_priority")]
    pub priority: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSendToRoleParams {
    pub from: String,
    pub role: String,
    pub content: String,
    #[serde(default = "default_priority")]
    pub priority: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailboxParams {
    pub agent_id: String,
}

// ---------------------------------------------------------------------
// task.*
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct TaskDecomposeParams {
    pub task: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
}

fn default_strategy() -> String {
    "component-based".to_string()
}

fn default_max_parallelism() -> usize {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskListCreateParams {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskCreateParams {
    pub list_id: String,
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_task_priority")]
    pub priority: String,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_task_priority() -> String {
    "medium".to_string()
}

fn default_task_type() -> String {
    "task".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskIdParams {
    pub task_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskAddDependencyParams {
    pub task_id: String,
    pub depends_on_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskListIdParams {
    pub list_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskHydrateParams {
    pub list_id: String,
    pub markdown: String,
    #[serde(default = "default_true")]
    pub skip_completed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSyncParams {
    pub list_id: String,
    /// When `Some`, update that document in place (only checkboxes change);
    /// otherwise a full regeneration is produced.
    #[serde(default)]
    pub original: Option<String>,
}

// ---------------------------------------------------------------------
// metrics / health
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub clusters: MetricsClusters,
    pub agents_running: usize,
    pub messaging: MetricsMessaging,
    pub tasks: MetricsTasks,
    pub uptime_secs: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsClusters {
    pub registered: usize,
    pub active: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsMessaging {
    pub sent_total: u64,
    pub urgent_total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsTasks {
    pub open: usize,
    pub done_total: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub timestamp: DateTime<Utc>,
}
