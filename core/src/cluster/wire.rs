//! Wire-level request/response shapes for the federation protocol.
//!
//! An external IDL is assumed upstream; these types are the Rust side of
//! that contract, encoded with MessagePack (`rmp-serde`) over the transport
//! in `cluster::client` rather than inventing a new serialization
//! framework.

use crate::agent::AgentStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSpawnRequest {
    pub agent_id: String,
    pub model: String,
    pub labels: HashMap<String, String>,
    pub timeout_seconds: u64,
    pub gpu_enabled: bool,
    pub gpu_type: Option<String>,
    pub env_vars: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSpawnResponse {
    pub agent_id: String,
    pub cluster_id: String,
    pub endpoint: String,
    pub status: AgentStatus,
    pub error: Option<WireError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireKillRequest {
    pub agent_id: String,
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireKillResponse {
    pub success: bool,
    pub error: Option<WireError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireExecRequest {
    pub agent_id: String,
    pub command: String,
    pub env: HashMap<String, String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireAgentStatusResponse {
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireAgentSummary {
    pub agent_id: String,
    pub status: AgentStatus,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireHeartbeatRequest {
    pub cluster_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireHeartbeatResponse {
    pub max_agents: u32,
    pub available_agents: u32,
    pub active_agents: u32,
    pub gpu_enabled: bool,
    pub gpu_types: Vec<String>,
    pub cost_per_hour: f64,
    pub latency_ms: f64,
    pub capabilities: HashMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubscription {
    pub cluster_id: String,
    pub event_types: Vec<String>,
    pub agent_id_filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationEvent {
    pub event_type: String,
    pub agent_id: Option<String>,
    pub cluster_id: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub source_cluster: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireExportRequest {
    pub agent_id: String,
    pub include_state: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireExportResponse {
    pub success: bool,
    pub agent_id: String,
    pub state_data: Vec<u8>,
    pub metadata: HashMap<String, String>,
    pub error: Option<WireError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireImportRequest {
    pub agent_id: String,
    pub state_data: Vec<u8>,
    pub metadata: HashMap<String, String>,
    pub target_cluster: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireImportResponse {
    pub success: bool,
    pub agent_id: String,
    pub cluster_id: String,
    pub error: Option<WireError>,
}

/// Opaque error carried on the wire; translated to `ClusterError` at the
/// client boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}
