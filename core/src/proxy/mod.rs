//! `TransparentProxy` (C5): the stable per-agent surface callers see.
//!
//! Owns its own agent→cluster routing map, separate from the balancer's —
//! the proxy falls through to the balancer's directory when its own map is
//! cold, a two-tier lookup between a request-local cache and the backing
//! table.

use crate::agent::{Agent, AgentListFilter, ExecChunk};
use crate::balancer::{LoadBalancer, SpawnConfig};
use crate::cluster::ClusterRegistry;
use crate::errors::{ProxyError, ProxyResult};
use crate::events::{EventBus, EventEnvelope, EventKind};
use crate::local_runtime::LocalRuntime;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{instrument, warn};

pub struct TransparentProxy {
    balancer: Arc<LoadBalancer>,
    registry: Arc<ClusterRegistry>,
    local_runtime: Arc<dyn LocalRuntime>,
    events: EventBus,
    routing: RwLock<HashMap<String, String>>,
}

impl TransparentProxy {
    pub fn new(
        balancer: Arc<LoadBalancer>,
        registry: Arc<ClusterRegistry>,
        local_runtime: Arc<dyn LocalRuntime>,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            balancer,
            registry,
            local_runtime,
            events,
            routing: RwLock::new(HashMap::new()),
        })
    }

    #[instrument(skip(self, config))]
    pub async fn spawn(&self, config: SpawnConfig) -> ProxyResult<Agent> {
        let agent = self.balancer.spawn(config).await?;
        self.routing.write().await.insert(agent.id.clone(), agent.cluster_id.clone());
        self.events.publish(
            EventEnvelope::new(EventKind::AgentSpawned)
                .with_id("agentId", agent.id.clone())
                .with_id("clusterId", agent.cluster_id.clone()),
        );
        Ok(agent)
    }

    async fn resolve(&self, agent_id: &str) -> ProxyResult<String> {
        if let Some(cluster_id) = self.routing.read().await.get(agent_id) {
            return Ok(cluster_id.clone());
        }
        if let Some(cluster_id) = self.balancer.cluster_of(agent_id).await {
            self.routing.write().await.insert(agent_id.to_string(), cluster_id.clone());
            return Ok(cluster_id);
        }
        Err(ProxyError::AgentNotFound(agent_id.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn exec(&self, agent_id: &str, cmd: &str) -> ProxyResult<(String, i32)> {
        let cluster_id = self.resolve(agent_id).await?;
        if cluster_id.is_empty() {
            Ok(self.local_runtime.exec(agent_id, cmd).await?)
        } else {
            let client = self
                .registry
                .client_for(&cluster_id)
                .ok_or_else(|| ProxyError::AgentNotFound(agent_id.to_string()))?;
            let mut stream = client
                .execute_command(crate::cluster::wire::WireExecRequest {
                    agent_id: agent_id.to_string(),
                    command: cmd.to_string(),
                    env: HashMap::new(),
                    timeout_seconds: 300,
                })
                .await?;
            let mut output = String::new();
            let mut exit_code = 1;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                output.push_str(&chunk.output);
                if let Some(code) = chunk.exit_code {
                    exit_code = code;
                }
            }
            Ok((output, exit_code))
        }
    }

    /// Streaming variant. If the backing transport does not stream, the
    /// caller still receives the full output as a single item.
    pub async fn exec_stream(
        &self,
        agent_id: &str,
        cmd: &str,
    ) -> ProxyResult<BoxStream<'static, ProxyResult<ExecChunk>>> {
        let cluster_id = self.resolve(agent_id).await?;
        if cluster_id.is_empty() {
            let (output, exit_code) = self.local_runtime.exec(agent_id, cmd).await?;
            let chunk = ExecChunk { output, is_error: exit_code != 0, exit_code: Some(exit_code) };
            return Ok(Box::pin(futures::stream::once(async { Ok(chunk) })));
        }
        let client = self
            .registry
            .client_for(&cluster_id)
            .ok_or_else(|| ProxyError::AgentNotFound(agent_id.to_string()))?;
        let stream = client
            .execute_command(crate::cluster::wire::WireExecRequest {
                agent_id: agent_id.to_string(),
                command: cmd.to_string(),
                env: HashMap::new(),
                timeout_seconds: 300,
            })
            .await?;
        Ok(Box::pin(stream.map(|r| r.map_err(ProxyError::from))))
    }

    #[instrument(skip(self))]
    pub async fn kill(&self, agent_id: &str, force: bool) -> ProxyResult<()> {
        let cluster_id = self.resolve(agent_id).await?;
        if cluster_id.is_empty() {
            self.local_runtime.kill(agent_id).await?;
        } else {
            let client = self
                .registry
                .client_for(&cluster_id)
                .ok_or_else(|| ProxyError::AgentNotFound(agent_id.to_string()))?;
            client
                .kill_agent(crate::cluster::wire::WireKillRequest { agent_id: agent_id.to_string(), force })
                .await?;
        }
        self.events.publish(EventEnvelope::new(EventKind::AgentKilled).with_id("agentId", agent_id));
        Ok(())
    }

    pub async fn status(&self, agent_id: &str) -> ProxyResult<crate::agent::AgentStatusReport> {
        let cluster_id = self.resolve(agent_id).await?;
        if cluster_id.is_empty() {
            let agents = self.local_runtime.list(&AgentListFilter::default()).await.map_err(crate::errors::BalancerError::from)?;
            let agent = agents
                .into_iter()
                .find(|a| a.id == agent_id)
                .ok_or_else(|| ProxyError::AgentNotFound(agent_id.to_string()))?;
            Ok(crate::agent::AgentStatusReport {
                status: agent.status,
                started_at: agent.started_at,
                last_activity: agent.started_at,
                metadata: HashMap::new(),
            })
        } else {
            let client = self
                .registry
                .client_for(&cluster_id)
                .ok_or_else(|| ProxyError::AgentNotFound(agent_id.to_string()))?;
            let resp = client.get_agent_status(agent_id).await?;
            Ok(crate::agent::AgentStatusReport {
                status: resp.status,
                started_at: resp.started_at,
                last_activity: resp.last_activity,
                metadata: resp.metadata,
            })
        }
    }

    #[instrument(skip(self))]
    pub async fn migrate(&self, agent_id: &str, to_cluster: &str) -> ProxyResult<()> {
        let from_cluster = self.resolve(agent_id).await?;
        self.balancer.migrate(agent_id, &from_cluster, to_cluster).await?;
        self.routing.write().await.insert(agent_id.to_string(), to_cluster.to_string());
        Ok(())
    }

    /// Merge local listings with every active cluster's `ListAgents`,
    /// tagging each returned agent with its originating cluster. A failed
    /// cluster listing is a warning, not a call failure.
    pub async fn list(&self, filter: &AgentListFilter) -> Vec<Agent> {
        let mut results = self.local_runtime.list(filter).await.unwrap_or_default();

        let active_clusters = self.registry.list_by_status(crate::cluster::ClusterStatus::Active);
        let fetches = active_clusters.into_iter().map(|cluster| {
            let registry = Arc::clone(&self.registry);
            async move {
                let Some(client) = registry.client_for(&cluster.id) else { return Vec::new() };
                match client.list_agents().await {
                    Ok(summaries) => summaries
                        .into_iter()
                        .map(|s| Agent {
                            id: s.agent_id,
                            cluster_id: cluster.id.clone(),
                            status: s.status,
                            model: s.model,
                            started_at: s.started_at,
                            labels: s.labels,
                        })
                        .collect(),
                    Err(e) => {
                        warn!(cluster_id = %cluster.id, error = %e, "list_agents failed on cluster, skipping");
                        Vec::new()
                    }
                }
            }
        });
        let remote: Vec<Vec<Agent>> = futures::future::join_all(fetches).await;
        for batch in remote {
            results.extend(batch);
        }
        results.retain(|a| filter.matches(a));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{client::MockClusterClient, Cluster};
    use crate::local_runtime::InProcessRuntime;

    fn make_proxy() -> Arc<TransparentProxy> {
        let events = EventBus::default();
        let registry = ClusterRegistry::new(events.clone(), crate::config::HealthConfig::default());
        let local = InProcessRuntime::new(10);
        let balancer = LoadBalancer::new(registry.clone(), local.clone(), events.clone(), crate::config::BalancerConfig::default());
        TransparentProxy::new(balancer, registry, local, events)
    }

    #[tokio::test]
    async fn spawn_then_exec_routes_to_same_backend() {
        let proxy = make_proxy();
        let agent = proxy.spawn(SpawnConfig { model: "m".into(), ..Default::default() }).await.unwrap();
        let (output, code) = proxy.exec(&agent.id, "echo hi").await.unwrap();
        assert_eq!(code, 0);
        assert!(output.contains("echo hi"));
    }

    #[tokio::test]
    async fn unknown_agent_is_not_found() {
        let proxy = make_proxy();
        let result = proxy.exec("ghost", "echo hi").await;
        assert!(matches!(result, Err(ProxyError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn list_merges_local_and_remote_and_tags_cluster() {
        let proxy = make_proxy();
        proxy.spawn(SpawnConfig { model: "m".into(), ..Default::default() }).await.unwrap();

        let mut cluster = Cluster::new("east", "east", "mock://east");
        cluster.capabilities.max_agents = 5;
        cluster.capabilities.available_agents = 5;
        proxy.registry.register(cluster, Arc::new(MockClusterClient::with_capacity(5))).unwrap();

        let agents = proxy.list(&AgentListFilter::default()).await;
        assert_eq!(agents.iter().filter(|a| a.is_local()).count(), 1);
    }
}
