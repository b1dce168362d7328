//! Cluster descriptor, capabilities, health state, and selection criteria.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed region enum, including the synthetic `local` tag used by the
/// balancer when describing the local runtime in region-scoped queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    UsEast,
    UsWest,
    Eu,
    ApSoutheast,
    Local,
    Other(String),
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Region::UsEast => write!(f, "us-east"),
            Region::UsWest => write!(f, "us-west"),
            Region::Eu => write!(f, "eu"),
            Region::ApSoutheast => write!(f, "ap-southeast"),
            Region::Local => write!(f, "local"),
            Region::Other(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Active,
    Degraded,
    Offline,
    Maintenance,
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClusterStatus::Active => "active",
            ClusterStatus::Degraded => "degraded",
            ClusterStatus::Offline => "offline",
            ClusterStatus::Maintenance => "maintenance",
        };
        write!(f, "{s}")
    }
}

/// Reported or configured capacity/cost/latency profile of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub max_agents: u32,
    pub available_agents: u32,
    pub active_agents: u32,
    pub gpu_enabled: bool,
    pub gpu_types: std::collections::HashSet<String>,
    pub cost_per_hour: f64,
    pub latency_ms: f64,
    pub flags: HashMap<String, bool>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_agents: 0,
            available_agents: 0,
            active_agents: 0,
            gpu_enabled: false,
            gpu_types: Default::default(),
            cost_per_hour: 0.0,
            latency_ms: 0.0,
            flags: HashMap::new(),
        }
    }
}

impl Capabilities {
    /// Re-derive `available_agents` from `max_agents`/`active_agents`,
    /// except when the caller has an authoritative figure to report
    /// instead.
    pub fn normalize(&mut self) {
        if self.active_agents > self.max_agents {
            self.active_agents = self.max_agents;
        }
        self.available_agents = self.max_agents.saturating_sub(self.active_agents);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsMaterial {
    pub cert_pem: String,
    pub key_pem: String,
    pub ca_pem: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub region: Region,
    pub status: ClusterStatus,
    pub capabilities: Capabilities,
    pub metadata: HashMap<String, String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub tls: Option<TlsMaterial>,
}

impl Cluster {
    pub fn new(id: impl Into<String>, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoint: endpoint.into(),
            region: Region::Local,
            status: ClusterStatus::Active,
            capabilities: Capabilities::default(),
            metadata: HashMap::new(),
            last_heartbeat: None,
            registered_at: Utc::now(),
            tls: None,
        }
    }
}

/// One health transition, kept in a bounded ring per cluster for the audit
/// trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthTransition {
    pub at: DateTime<Utc>,
    pub from: ClusterStatus,
    pub to: ClusterStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterHealthState {
    pub status: ClusterStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_latency_ms: Option<f64>,
    pub message: Option<String>,
    #[serde(default)]
    pub history: std::collections::VecDeque<HealthTransition>,
}

impl Default for ClusterHealthState {
    fn default() -> Self {
        Self {
            status: ClusterStatus::Active,
            last_heartbeat: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_latency_ms: None,
            message: None,
            history: std::collections::VecDeque::new(),
        }
    }
}

const HEALTH_HISTORY_CAP: usize = 32;

impl ClusterHealthState {
    pub fn record_transition(&mut self, to: ClusterStatus, message: Option<String>) {
        if to != self.status {
            self.history.push_back(HealthTransition {
                at: Utc::now(),
                from: self.status,
                to,
                message: message.clone(),
            });
            while self.history.len() > HEALTH_HISTORY_CAP {
                self.history.pop_front();
            }
            self.status = to;
        }
        self.message = message;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPriority {
    Latency,
    Cost,
    Availability,
    Gpu,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Criteria {
    pub priority: Option<SelectionPriority>,
    pub min_agents: u32,
    pub requires_gpu: bool,
    pub gpu_type: Option<String>,
    pub max_latency_ms: Option<f64>,
    pub max_cost_per_hour: Option<f64>,
    pub preferred_regions: std::collections::HashSet<Region>,
    pub excluded_regions: std::collections::HashSet<Region>,
    pub required_capability_flags: Vec<String>,
}

impl Criteria {
    pub fn priority_or_default(&self) -> SelectionPriority {
        self.priority.unwrap_or(SelectionPriority::Availability)
    }
}
