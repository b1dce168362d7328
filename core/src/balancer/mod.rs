//! `LoadBalancer` (C4): spawn policy, the migration protocol, and failover.
//!
//! Agent placement/ownership is tracked in a routing map guarded by a
//! reader-writer lock taken only around a migration's start/finish steps,
//! leaving lookups unblocked for the common case.

use crate::agent::{Agent, AgentStatus, SpawnRequest};
use crate::cluster::{Cluster, ClusterRegistry, Criteria, SelectionPriority};
use crate::errors::{BalancerError, BalancerResult, ClusterError};
use crate::events::{EventBus, EventEnvelope, EventKind};
use crate::local_runtime::LocalRuntime;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// Caller-supplied spawn policy inputs.
#[derive(Debug, Clone, Default)]
pub struct SpawnConfig {
    pub model: String,
    pub requires_gpu: bool,
    pub gpu_type: Option<String>,
    pub priority: Option<SelectionPriority>,
    pub prefer_local: bool,
    pub labels: std::collections::HashMap<String, String>,
    pub env_vars: std::collections::HashMap<String, String>,
    pub timeout_seconds: u64,
}

impl SpawnConfig {
    fn to_criteria(&self) -> Criteria {
        Criteria {
            priority: self.priority.or(Some(SelectionPriority::Availability)),
            min_agents: 1,
            requires_gpu: self.requires_gpu,
            gpu_type: self.gpu_type.clone(),
            ..Default::default()
        }
    }

    fn to_spawn_request(&self) -> SpawnRequest {
        SpawnRequest {
            model: self.model.clone(),
            labels: self.labels.clone(),
            requires_gpu: self.requires_gpu,
            gpu_type: self.gpu_type.clone(),
            env_vars: self.env_vars.clone(),
            timeout_seconds: if self.timeout_seconds == 0 { 300 } else { self.timeout_seconds },
        }
    }

    fn to_wire_spawn(&self, agent_id: &str) -> crate::cluster::wire::WireSpawnRequest {
        crate::cluster::wire::WireSpawnRequest {
            agent_id: agent_id.to_string(),
            model: self.model.clone(),
            labels: self.labels.clone(),
            timeout_seconds: if self.timeout_seconds == 0 { 300 } else { self.timeout_seconds },
            gpu_enabled: self.requires_gpu,
            gpu_type: self.gpu_type.clone(),
            env_vars: self.env_vars.clone(),
        }
    }
}

/// The failing step of a rolled-back migration, carried on `migration:failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    Export,
    Import,
    Verify,
}

impl MigrationStep {
    fn as_str(&self) -> &'static str {
        match self {
            MigrationStep::Export => "export",
            MigrationStep::Import => "import",
            MigrationStep::Verify => "verify",
        }
    }
}

pub struct LoadBalancer {
    registry: Arc<ClusterRegistry>,
    local_runtime: Arc<dyn LocalRuntime>,
    events: EventBus,
    config: crate::config::BalancerConfig,
    /// agentId -> clusterId (empty string = local). The writer lock is
    /// taken only around a migration's start and finish steps.
    routing: Arc<RwLock<std::collections::HashMap<String, String>>>,
    in_flight_migrations: DashMap<String, ()>,
    migration_count: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        local_runtime: Arc<dyn LocalRuntime>,
        events: EventBus,
        config: crate::config::BalancerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            local_runtime,
            events,
            config,
            routing: Arc::new(RwLock::new(std::collections::HashMap::new())),
            in_flight_migrations: DashMap::new(),
            migration_count: AtomicUsize::new(0),
        })
    }

    pub async fn cluster_of(&self, agent_id: &str) -> Option<String> {
        self.routing.read().await.get(agent_id).cloned()
    }

    #[instrument(skip(self, config))]
    pub async fn spawn(&self, config: SpawnConfig) -> BalancerResult<Agent> {
        let criteria = config.to_criteria();
        let remote = self.registry.select(&criteria);

        let prefer_local = config.prefer_local
            || remote.is_none()
            || remote
                .as_ref()
                .map(|c| self.is_below_local_floor(c))
                .unwrap_or(true);

        let candidates: Vec<Option<Cluster>> = if prefer_local {
            vec![None, remote]
        } else {
            vec![remote, None]
        };

        let mut last_err: Option<BalancerError> = None;
        let mut attempted = 0u32;
        'candidates: for candidate in candidates.into_iter() {
            if attempted >= self.config.max_spawn_attempts.max(1) {
                break;
            }
            attempted += 1;
            match candidate {
                None => match self.try_spawn_local(&config).await {
                    Ok(agent) => return self.finish_spawn(agent, String::new()).await,
                    Err(e) => {
                        last_err = Some(e.into());
                        continue 'candidates;
                    }
                },
                Some(cluster) => match self.try_spawn_remote(&cluster, &config).await {
                    Ok(agent) => return self.finish_spawn(agent, cluster.id).await,
                    Err(e) => {
                        last_err = Some(e.into());
                        continue 'candidates;
                    }
                },
            }
        }
        warn!("spawn exhausted all candidates");
        Err(last_err.unwrap_or(BalancerError::NoCapacity))
    }

    fn is_below_local_floor(&self, cluster: &Cluster) -> bool {
        let score = 100.0 * cluster.capabilities.available_agents as f64
            / cluster.capabilities.max_agents.max(1) as f64;
        score < self.config.local_floor
    }

    async fn try_spawn_local(&self, config: &SpawnConfig) -> Result<Agent, crate::errors::LocalRuntimeError> {
        self.local_runtime.spawn(config.to_spawn_request()).await
    }

    async fn try_spawn_remote(&self, cluster: &Cluster, config: &SpawnConfig) -> Result<Agent, ClusterError> {
        let client = self
            .registry
            .client_for(&cluster.id)
            .ok_or_else(|| ClusterError::ClusterUnavailable(cluster.id.clone()))?;
        let agent_id = uuid::Uuid::new_v4().to_string();
        let resp = client.spawn_agent(config.to_wire_spawn(&agent_id)).await?;
        if let Some(err) = resp.error {
            return Err(ClusterError::ClusterErrorCode { code: err.code, message: err.message });
        }
        Ok(Agent {
            id: resp.agent_id,
            cluster_id: resp.cluster_id,
            status: resp.status,
            model: config.model.clone(),
            started_at: chrono::Utc::now(),
            labels: config.labels.clone(),
        })
    }

    async fn finish_spawn(&self, agent: Agent, cluster_id: String) -> BalancerResult<Agent> {
        self.routing.write().await.insert(agent.id.clone(), cluster_id.clone());
        self.events.publish(
            EventEnvelope::new(EventKind::AgentSpawned)
                .with_id("agentId", agent.id.clone())
                .with_id("clusterId", cluster_id),
        );
        Ok(agent)
    }

    #[instrument(skip(self))]
    pub async fn migrate(&self, agent_id: &str, from_cluster: &str, to_cluster: &str) -> BalancerResult<()> {
        if self.in_flight_migrations.contains_key(agent_id) {
            return Err(BalancerError::MigrationInProgress(agent_id.to_string()));
        }
        if self.migration_count.load(Ordering::SeqCst) >= self.config.max_concurrent_migrations {
            return Err(BalancerError::MigrationInProgress(agent_id.to_string()));
        }
        self.in_flight_migrations.insert(agent_id.to_string(), ());
        self.migration_count.fetch_add(1, Ordering::SeqCst);

        let result = self.run_migration(agent_id, from_cluster, to_cluster).await;

        self.in_flight_migrations.remove(agent_id);
        self.migration_count.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn run_migration(&self, agent_id: &str, from_cluster: &str, to_cluster: &str) -> BalancerResult<()> {
        // step (a): mark migrating, writer lock scope only around this write.
        {
            let mut routing = self.routing.write().await;
            routing.insert(agent_id.to_string(), from_cluster.to_string());
        }
        self.events.publish(
            EventEnvelope::new(EventKind::MigrationStarted).with_id("agentId", agent_id),
        );

        let source = self
            .registry
            .client_for(from_cluster)
            .ok_or_else(|| BalancerError::Cluster(ClusterError::ClusterUnavailable(from_cluster.to_string())))?;
        let target = self
            .registry
            .client_for(to_cluster)
            .ok_or_else(|| BalancerError::Cluster(ClusterError::ClusterUnavailable(to_cluster.to_string())))?;

        // step (b): export.
        let snapshot = match source
            .export_agent(crate::cluster::wire::WireExportRequest {
                agent_id: agent_id.to_string(),
                include_state: true,
            })
            .await
        {
            Ok(snap) if snap.success => snap,
            Ok(snap) => {
                self.fail_migration(agent_id, from_cluster, MigrationStep::Export, snap.error.map(|e| e.message))
                    .await;
                return Err(BalancerError::Cluster(ClusterError::ClusterUnavailable(
                    "export failed".to_string(),
                )));
            }
            Err(e) => {
                self.fail_migration(agent_id, from_cluster, MigrationStep::Export, Some(e.to_string())).await;
                return Err(BalancerError::Cluster(e));
            }
        };

        // step (c): import.
        let imported = match target
            .import_agent(crate::cluster::wire::WireImportRequest {
                agent_id: agent_id.to_string(),
                state_data: snapshot.state_data,
                metadata: snapshot.metadata,
                target_cluster: to_cluster.to_string(),
            })
            .await
        {
            Ok(resp) if resp.success => resp,
            Ok(resp) => {
                let _ = target
                    .kill_agent(crate::cluster::wire::WireKillRequest { agent_id: agent_id.to_string(), force: true })
                    .await;
                self.fail_migration(agent_id, from_cluster, MigrationStep::Import, resp.error.map(|e| e.message))
                    .await;
                return Err(BalancerError::Cluster(ClusterError::ClusterUnavailable(
                    "import failed".to_string(),
                )));
            }
            Err(e) => {
                let _ = target
                    .kill_agent(crate::cluster::wire::WireKillRequest { agent_id: agent_id.to_string(), force: true })
                    .await;
                self.fail_migration(agent_id, from_cluster, MigrationStep::Import, Some(e.to_string())).await;
                return Err(BalancerError::Cluster(e));
            }
        };

        // step (d): verify target reports running, within the verify timeout.
        let verify = tokio::time::timeout(
            self.config.migration_verify_timeout(),
            target.get_agent_status(&imported.agent_id),
        )
        .await;
        let verified = match verify {
            Ok(Ok(status)) if status.status == AgentStatus::Running => true,
            _ => false,
        };
        if !verified {
            // rollback: kill the partial import on the target with force.
            let _ = target
                .kill_agent(crate::cluster::wire::WireKillRequest { agent_id: agent_id.to_string(), force: true })
                .await;
            self.fail_migration(agent_id, from_cluster, MigrationStep::Verify, Some("target did not report running".into()))
                .await;
            return Err(BalancerError::Cluster(ClusterError::Timeout(self.config.migration_verify_timeout())));
        }

        // step (e): kill on source, non-force. Failure does not fail the migration.
        let kill_result = source
            .kill_agent(crate::cluster::wire::WireKillRequest { agent_id: agent_id.to_string(), force: false })
            .await;
        let source_kill_failed = !matches!(kill_result, Ok(ref r) if r.success);
        if source_kill_failed {
            self.events.publish(
                EventEnvelope::new(EventKind::CleanupPending).with_id("agentId", agent_id).with_id(
                    "clusterId",
                    from_cluster,
                ),
            );
        }

        // step (f): commit routing, writer lock scope only around this write.
        {
            let mut routing = self.routing.write().await;
            routing.insert(agent_id.to_string(), to_cluster.to_string());
        }
        info!(agent_id, from_cluster, to_cluster, "migration completed");
        self.events.publish(
            EventEnvelope::new(EventKind::MigrationCompleted)
                .with_id("agentId", agent_id)
                .with_id("clusterId", to_cluster),
        );
        Ok(())
    }

    async fn fail_migration(&self, agent_id: &str, from_cluster: &str, step: MigrationStep, message: Option<String>) {
        {
            let mut routing = self.routing.write().await;
            routing.insert(agent_id.to_string(), from_cluster.to_string());
        }
        warn!(agent_id, step = step.as_str(), ?message, "migration rolled back");
        self.events.publish(
            EventEnvelope::new(EventKind::MigrationFailed)
                .with_id("agentId", agent_id)
                .with_payload(serde_json::json!({ "step": step.as_str(), "message": message })),
        );
    }

    /// Mark `cluster_id` as not accepting new traffic and enqueue migration
    /// of every agent it currently owns to a registry-selected destination.
    #[instrument(skip(self))]
    pub async fn failover_cluster(self: &Arc<Self>, cluster_id: &str) -> BalancerResult<Vec<String>> {
        let owned: Vec<String> = {
            let routing = self.routing.read().await;
            routing
                .iter()
                .filter(|(_, c)| c.as_str() == cluster_id)
                .map(|(a, _)| a.clone())
                .collect()
        };

        let criteria = Criteria::default();
        let mut excluded = HashSet::new();
        excluded.insert(cluster_id.to_string());

        let mut migrated = Vec::new();
        for agent_id in owned {
            let destination = self.registry.select(&criteria).filter(|c| !excluded.contains(&c.id));
            let Some(destination) = destination else {
                warn!(agent_id, "no failover destination available");
                continue;
            };
            if self.migrate(&agent_id, cluster_id, &destination.id).await.is_ok() {
                migrated.push(agent_id);
            }
        }
        Ok(migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{client::MockClusterClient, Cluster};
    use crate::local_runtime::InProcessRuntime;

    fn make_balancer() -> (Arc<LoadBalancer>, Arc<ClusterRegistry>) {
        let events = EventBus::default();
        let registry = ClusterRegistry::new(events.clone(), crate::config::HealthConfig::default());
        let local = InProcessRuntime::new(10);
        let balancer = LoadBalancer::new(registry.clone(), local, events, crate::config::BalancerConfig::default());
        (balancer, registry)
    }

    #[tokio::test]
    async fn spawns_locally_when_registry_is_empty() {
        let (balancer, _registry) = make_balancer();
        let agent = balancer.spawn(SpawnConfig { model: "m".into(), ..Default::default() }).await.unwrap();
        assert!(agent.is_local());
    }

    #[tokio::test]
    async fn spawns_remote_when_candidate_available_and_above_local_floor() {
        let (balancer, registry) = make_balancer();
        let mut cluster = Cluster::new("gpu-east", "gpu-east", "mock://gpu-east");
        cluster.capabilities.max_agents = 10;
        cluster.capabilities.available_agents = 10;
        cluster.capabilities.gpu_enabled = true;
        registry.register(cluster, Arc::new(MockClusterClient::with_capacity(10))).unwrap();

        let agent = balancer
            .spawn(SpawnConfig { model: "m".into(), requires_gpu: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(agent.cluster_id, "mock");
    }

    #[tokio::test]
    async fn duplicate_migration_is_rejected() {
        let (balancer, registry) = make_balancer();
        registry
            .register(Cluster::new("a", "a", "mock://a"), Arc::new(MockClusterClient::with_capacity(10)))
            .unwrap();
        registry
            .register(Cluster::new("b", "b", "mock://b"), Arc::new(MockClusterClient::with_capacity(10)))
            .unwrap();

        balancer.in_flight_migrations.insert("agent-1".to_string(), ());
        let result = balancer.migrate("agent-1", "a", "b").await;
        assert!(matches!(result, Err(BalancerError::MigrationInProgress(_))));
    }
}
