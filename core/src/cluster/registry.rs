//! `ClusterRegistry` (C2): the in-memory cluster table, health-probe loop,
//! and selection algorithm.
//!
//! Single writer, lock-free snapshot reads: `parking_lot::Mutex` guards the
//! cluster map the way a session table would be guarded under concurrent
//! registration and health-probe traffic.

use super::client::ClusterClient;
use super::types::*;
use crate::errors::{ClusterError, ClusterResult};
use crate::events::{EventBus, EventEnvelope, EventKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

struct Entry {
    cluster: Cluster,
    health: ClusterHealthState,
    client: Arc<dyn ClusterClient>,
}

pub struct ClusterRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    insertion_order: Mutex<Vec<String>>,
    events: EventBus,
    health_config: crate::config::HealthConfig,
    probe_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterRegistry {
    pub fn new(events: EventBus, health_config: crate::config::HealthConfig) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            insertion_order: Mutex::new(Vec::new()),
            events,
            health_config,
            probe_handle: Mutex::new(None),
        })
    }

    /// Register (or update in place) a cluster. Re-registering the same id
    /// updates the descriptor without creating a duplicate.
    #[instrument(skip(self, client), fields(cluster_id = %cluster.id))]
    pub fn register(&self, cluster: Cluster, client: Arc<dyn ClusterClient>) -> ClusterResult<()> {
        if cluster.id.is_empty() {
            return Err(ClusterError::InvalidSpec("cluster id must be non-empty".into()));
        }
        if cluster.endpoint.is_empty() {
            return Err(ClusterError::InvalidSpec("cluster endpoint must be non-empty".into()));
        }

        let mut entries = self.entries.lock();
        let is_update = entries.contains_key(&cluster.id);
        let id = cluster.id.clone();
        entries.insert(
            id.clone(),
            Entry {
                health: ClusterHealthState {
                    status: cluster.status,
                    ..Default::default()
                },
                cluster,
                client,
            },
        );
        drop(entries);

        if !is_update {
            self.insertion_order.lock().push(id.clone());
            self.events
                .publish(EventEnvelope::new(EventKind::ClusterRegistered).with_id("clusterId", id));
        } else {
            self.events
                .publish(EventEnvelope::new(EventKind::ClusterUpdated).with_id("clusterId", id));
        }
        Ok(())
    }

    /// Unregister a cluster; the caller (C5/C4) is responsible for checking
    /// that no agent is still routed there before calling this.
    pub fn unregister(&self, cluster_id: &str) -> ClusterResult<()> {
        let removed = self.entries.lock().remove(cluster_id).is_some();
        if removed {
            self.insertion_order.lock().retain(|id| id != cluster_id);
            self.events.publish(
                EventEnvelope::new(EventKind::ClusterUnregistered).with_id("clusterId", cluster_id),
            );
            Ok(())
        } else {
            Err(ClusterError::InvalidSpec(format!("unknown cluster {cluster_id}")))
        }
    }

    pub fn get(&self, cluster_id: &str) -> Option<Cluster> {
        self.entries.lock().get(cluster_id).map(|e| e.cluster.clone())
    }

    pub fn client_for(&self, cluster_id: &str) -> Option<Arc<dyn ClusterClient>> {
        self.entries.lock().get(cluster_id).map(|e| e.client.clone())
    }

    pub fn health_of(&self, cluster_id: &str) -> Option<ClusterHealthState> {
        self.entries.lock().get(cluster_id).map(|e| e.health.clone())
    }

    pub fn list_by_region(&self, region: &Region) -> Vec<Cluster> {
        self.entries
            .lock()
            .values()
            .filter(|e| &e.cluster.region == region)
            .map(|e| e.cluster.clone())
            .collect()
    }

    pub fn list_by_status(&self, status: ClusterStatus) -> Vec<Cluster> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.cluster.status == status)
            .map(|e| e.cluster.clone())
            .collect()
    }

    pub fn list_by_capability_flag(&self, flag: &str) -> Vec<Cluster> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.cluster.capabilities.flags.get(flag).copied().unwrap_or(false))
            .map(|e| e.cluster.clone())
            .collect()
    }

    /// Select the best cluster under `criteria`, or `None` if nothing
    /// qualifies (an empty registry selects nothing).
    pub fn select(&self, criteria: &Criteria) -> Option<Cluster> {
        let entries = self.entries.lock();
        let order = self.insertion_order.lock();

        let mut best: Option<(f64, usize, Cluster)> = None;

        for (rank, id) in order.iter().enumerate() {
            let Some(entry) = entries.get(id) else { continue };
            if entry.cluster.status != ClusterStatus::Active {
                continue;
            }
            if !passes_hard_filters(&entry.cluster, criteria) {
                continue;
            }
            let score = score_cluster(&entry.cluster, criteria);
            match &best {
                Some((best_score, _, _)) if *best_score >= score => {}
                _ => best = Some((score, rank, entry.cluster.clone())),
            }
        }

        best.map(|(_, _, cluster)| cluster)
    }

    /// Start the periodic health-probe loop. Returns immediately; the loop
    /// runs until `stop_health_loop` or registry drop.
    pub fn start_health_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let interval = self.health_config.probe_interval();
        let handle = tokio::spawn(async move {
            this.events.publish(EventEnvelope::new(EventKind::HealthStarted));
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.run_health_cycle().await;
            }
        });
        *self.probe_handle.lock() = Some(handle);
    }

    pub fn stop_health_loop(&self) {
        if let Some(handle) = self.probe_handle.lock().take() {
            handle.abort();
            self.events.publish(EventEnvelope::new(EventKind::HealthStopped));
        }
    }

    #[instrument(skip(self))]
    async fn run_health_cycle(self: &Arc<Self>) {
        let ids: Vec<String> = self.entries.lock().keys().cloned().collect();
        let probes = ids.into_iter().map(|id| {
            let this = Arc::clone(self);
            async move { (id.clone(), this.probe_one(&id).await) }
        });
        let results = futures::future::join_all(probes).await;

        let mut to_remove = Vec::new();
        for (id, outcome) in results {
            if let Err(e) = outcome {
                warn!(cluster_id = %id, error = %e, "health probe failed");
            }
            if self.should_auto_remove(&id) {
                to_remove.push(id);
            }
        }
        for id in to_remove {
            let _ = self.unregister(&id);
        }
        self.events.publish(EventEnvelope::new(EventKind::HealthCycleCompleted));
    }

    fn should_auto_remove(&self, cluster_id: &str) -> bool {
        let Some(after) = self.health_config.auto_remove_after_ms else { return false };
        let entries = self.entries.lock();
        let Some(entry) = entries.get(cluster_id) else { return false };
        if entry.health.status != ClusterStatus::Offline {
            return false;
        }
        match entry.health.last_heartbeat {
            Some(last) => {
                let elapsed = chrono::Utc::now().signed_duration_since(last);
                elapsed.num_milliseconds() as u64 > after
            }
            None => false,
        }
    }

    async fn probe_one(self: &Arc<Self>, cluster_id: &str) -> ClusterResult<()> {
        let client = self
            .client_for(cluster_id)
            .ok_or_else(|| ClusterError::ClusterUnavailable(cluster_id.to_string()))?;

        let timeout = self.health_config.probe_timeout();
        let req = super::wire::WireHeartbeatRequest {
            cluster_id: cluster_id.to_string(),
            timestamp: chrono::Utc::now(),
        };

        let result = tokio::time::timeout(timeout, client.heartbeat(req)).await;

        match result {
            Ok(Ok(caps)) => {
                self.record_success(cluster_id, caps, timeout);
                Ok(())
            }
            Ok(Err(e)) => {
                self.record_failure(cluster_id, Some(e.to_string()));
                self.events.publish(
                    EventEnvelope::new(EventKind::HealthCheckFailed).with_id("clusterId", cluster_id),
                );
                Err(e)
            }
            Err(_) => {
                self.record_failure(cluster_id, Some("probe timed out".to_string()));
                self.events.publish(
                    EventEnvelope::new(EventKind::HealthCheckFailed).with_id("clusterId", cluster_id),
                );
                Err(ClusterError::Timeout(timeout))
            }
        }
    }

    fn record_success(&self, cluster_id: &str, caps: super::wire::WireHeartbeatResponse, probe_timeout: Duration) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(cluster_id) else { return };

        entry.health.consecutive_successes += 1;
        entry.health.consecutive_failures = 0;
        entry.health.last_latency_ms = Some(caps.latency_ms);
        entry.health.last_heartbeat = Some(chrono::Utc::now());

        let degraded = caps.latency_ms > probe_timeout.as_millis() as f64 / 2.0;
        let new_status = if degraded { ClusterStatus::Degraded } else { ClusterStatus::Active };
        let old_status = entry.health.status;
        entry.health.record_transition(new_status, None);
        entry.cluster.status = new_status;
        entry.cluster.last_heartbeat = entry.health.last_heartbeat;

        entry.cluster.capabilities.max_agents = caps.max_agents;
        entry.cluster.capabilities.active_agents = caps.active_agents;
        entry.cluster.capabilities.available_agents = caps.available_agents;
        entry.cluster.capabilities.gpu_enabled = caps.gpu_enabled;
        entry.cluster.capabilities.gpu_types = caps.gpu_types.into_iter().collect();
        entry.cluster.capabilities.cost_per_hour = caps.cost_per_hour;
        entry.cluster.capabilities.latency_ms = caps.latency_ms;
        entry.cluster.capabilities.flags = caps.capabilities;
        entry.cluster.capabilities.normalize();

        if old_status != new_status {
            drop(entries);
            self.events.publish(
                EventEnvelope::new(EventKind::ClusterStatusChanged)
                    .with_id("clusterId", cluster_id)
                    .with_payload(serde_json::json!({ "from": old_status.to_string(), "to": new_status.to_string() })),
            );
        }
        self.events
            .publish(EventEnvelope::new(EventKind::HealthChecked).with_id("clusterId", cluster_id));
    }

    fn record_failure(&self, cluster_id: &str, message: Option<String>) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(cluster_id) else { return };

        entry.health.consecutive_failures += 1;
        entry.health.consecutive_successes = 0;

        let old_status = entry.health.status;
        let new_status = if entry.health.consecutive_failures >= self.health_config.offline_threshold {
            ClusterStatus::Offline
        } else if entry.health.consecutive_failures >= self.health_config.degraded_threshold {
            ClusterStatus::Degraded
        } else {
            old_status
        };
        entry.health.record_transition(new_status, message);
        entry.cluster.status = new_status;

        if old_status != new_status {
            drop(entries);
            info!(cluster_id, from = %old_status, to = %new_status, "cluster health transition");
            self.events.publish(
                EventEnvelope::new(EventKind::ClusterStatusChanged)
                    .with_id("clusterId", cluster_id)
                    .with_payload(serde_json::json!({ "from": old_status.to_string(), "to": new_status.to_string() })),
            );
        }
    }
}

fn passes_hard_filters(cluster: &Cluster, criteria: &Criteria) -> bool {
    if cluster.capabilities.available_agents < criteria.min_agents {
        return false;
    }
    if criteria.requires_gpu && !cluster.capabilities.gpu_enabled {
        return false;
    }
    if let Some(gpu_type) = &criteria.gpu_type {
        if !cluster.capabilities.gpu_types.contains(gpu_type) {
            return false;
        }
    }
    if let Some(max_latency) = criteria.max_latency_ms {
        if cluster.capabilities.latency_ms > max_latency {
            return false;
        }
    }
    if let Some(max_cost) = criteria.max_cost_per_hour {
        if cluster.capabilities.cost_per_hour > max_cost {
            return false;
        }
    }
    if criteria.excluded_regions.contains(&cluster.region) {
        return false;
    }
    for flag in &criteria.required_capability_flags {
        if !cluster.capabilities.flags.get(flag).copied().unwrap_or(false) {
            return false;
        }
    }
    true
}

fn score_cluster(cluster: &Cluster, criteria: &Criteria) -> f64 {
    let latency_score = (100.0 - cluster.capabilities.latency_ms).max(0.0);
    let cost_score = (100.0 - 10.0 * cluster.capabilities.cost_per_hour).max(0.0);
    let availability_score = 100.0 * cluster.capabilities.available_agents as f64
        / cluster.capabilities.max_agents.max(1) as f64;
    let gpu_bonus = if cluster.capabilities.gpu_enabled { 10.0 } else { 0.0 };
    let region_bonus = if criteria.preferred_regions.contains(&cluster.region) { 15.0 } else { 0.0 };

    let (w_latency, w_cost, w_availability, gpu_multiplier) = match criteria.priority_or_default() {
        SelectionPriority::Latency => (0.5, 0.3, 0.2, 1.0),
        SelectionPriority::Cost => (0.3, 0.5, 0.2, 1.0),
        SelectionPriority::Availability => (0.3, 0.2, 0.5, 1.0),
        SelectionPriority::Gpu => (0.3, 0.3, 0.3, 5.0),
    };

    w_latency * latency_score
        + w_cost * cost_score
        + w_availability * availability_score
        + gpu_bonus * gpu_multiplier
        + region_bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::client::MockClusterClient;

    fn cluster(id: &str, cost: f64, latency: f64) -> Cluster {
        let mut c = Cluster::new(id, id, format!("mock://{id}"));
        c.capabilities.max_agents = 10;
        c.capabilities.available_agents = 10;
        c.capabilities.cost_per_hour = cost;
        c.capabilities.latency_ms = latency;
        c
    }

    #[test]
    fn empty_registry_selects_nothing() {
        let registry = ClusterRegistry::new(EventBus::default(), crate::config::HealthConfig::default());
        assert!(registry.select(&Criteria::default()).is_none());
    }

    #[test]
    fn selection_follows_priority_then_flips_on_priority_change() {
        let registry = ClusterRegistry::new(EventBus::default(), crate::config::HealthConfig::default());
        registry
            .register(cluster("a", 1.0, 40.0), Arc::new(MockClusterClient::with_capacity(10)))
            .unwrap();
        registry
            .register(cluster("b", 3.0, 10.0), Arc::new(MockClusterClient::with_capacity(10)))
            .unwrap();

        let cost_first = Criteria { priority: Some(SelectionPriority::Cost), ..Default::default() };
        assert_eq!(registry.select(&cost_first).unwrap().id, "a");

        let latency_first = Criteria { priority: Some(SelectionPriority::Latency), ..Default::default() };
        assert_eq!(registry.select(&latency_first).unwrap().id, "b");
    }

    #[test]
    fn reregistering_same_id_updates_in_place() {
        let registry = ClusterRegistry::new(EventBus::default(), crate::config::HealthConfig::default());
        registry
            .register(cluster("a", 1.0, 40.0), Arc::new(MockClusterClient::with_capacity(10)))
            .unwrap();
        registry
            .register(cluster("a", 2.0, 20.0), Arc::new(MockClusterClient::with_capacity(10)))
            .unwrap();
        assert_eq!(registry.insertion_order.lock().len(), 1);
        assert_eq!(registry.get("a").unwrap().capabilities.cost_per_hour, 2.0);
    }

    #[test]
    fn offline_cluster_is_filtered_from_selection() {
        let registry = ClusterRegistry::new(EventBus::default(), crate::config::HealthConfig::default());
        registry
            .register(cluster("a", 1.0, 40.0), Arc::new(MockClusterClient::with_capacity(10)))
            .unwrap();
        registry
            .register(cluster("b", 3.0, 10.0), Arc::new(MockClusterClient::with_capacity(10)))
            .unwrap();
        for _ in 0..5 {
            registry.record_failure("a", Some("probe failed".to_string()));
        }
        assert_eq!(registry.health_of("a").unwrap().status, ClusterStatus::Offline);
        let cost_first = Criteria { priority: Some(SelectionPriority::Cost), ..Default::default() };
        assert_eq!(registry.select(&cost_first).unwrap().id, "b");
    }

    #[test]
    fn availability_priority_favors_the_roomier_cluster_despite_worse_cost_and_latency() {
        let registry = ClusterRegistry::new(EventBus::default(), crate::config::HealthConfig::default());
        let mut tight = cluster("tight", 1.0, 10.0);
        tight.capabilities.max_agents = 10;
        tight.capabilities.available_agents = 1;
        let mut roomy = cluster("roomy", 5.0, 50.0);
        roomy.capabilities.max_agents = 10;
        roomy.capabilities.available_agents = 10;
        registry.register(tight, Arc::new(MockClusterClient::with_capacity(10))).unwrap();
        registry.register(roomy, Arc::new(MockClusterClient::with_capacity(10))).unwrap();

        let availability_first = Criteria { priority: Some(SelectionPriority::Availability), ..Default::default() };
        assert_eq!(registry.select(&availability_first).unwrap().id, "roomy");
    }
}
