//! `ClusterClient` (C1): the federation-facing transport every remote
//! cluster is reached through.
//!
//! A `ReqSocket` per outbound RPC-style call, MessagePack framing, and a
//! `SubSocket` for the cluster's event stream. `MockClusterClient` is an
//! in-memory double of the same trait, letting the balancer and proxy be
//! tested without a live ZMQ peer.

use super::wire::*;
use crate::agent::{AgentStatus, ExecChunk};
use crate::errors::{ClusterError, ClusterResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Transport-agnostic contract for talking to one remote cluster. A
/// `Cluster` descriptor's `endpoint` is resolved to a `ClusterClient` by
/// `ClusterRegistry`; the registry and balancer never speak wire formats
/// directly.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn spawn_agent(&self, req: WireSpawnRequest) -> ClusterResult<WireSpawnResponse>;

    async fn kill_agent(&self, req: WireKillRequest) -> ClusterResult<WireKillResponse>;

    async fn execute_command(
        &self,
        req: WireExecRequest,
    ) -> ClusterResult<BoxStream<'static, ClusterResult<ExecChunk>>>;

    async fn get_agent_status(&self, agent_id: &str) -> ClusterResult<WireAgentStatusResponse>;

    async fn list_agents(&self) -> ClusterResult<Vec<WireAgentSummary>>;

    async fn heartbeat(&self, req: WireHeartbeatRequest) -> ClusterResult<WireHeartbeatResponse>;

    async fn stream_events(
        &self,
        subscription: EventSubscription,
    ) -> ClusterResult<BoxStream<'static, FederationEvent>>;

    async fn export_agent(&self, req: WireExportRequest) -> ClusterResult<WireExportResponse>;

    async fn import_agent(&self, req: WireImportRequest) -> ClusterResult<WireImportResponse>;
}

/// ZeroMQ-backed implementation: REQ/REP for the unary calls, SUB for the
/// event stream.
pub struct ZmqClusterTransport {
    endpoint: String,
    req: Arc<Mutex<zeromq::ReqSocket>>,
    call_timeout: Duration,
}

impl ZmqClusterTransport {
    pub async fn connect(endpoint: &str, call_timeout: Duration) -> ClusterResult<Self> {
        use zeromq::Socket;
        let mut req = zeromq::ReqSocket::new();
        req.connect(endpoint)
            .await
            .map_err(|e| ClusterError::ClusterUnavailable(format!("{endpoint}: {e}")))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            req: Arc::new(Mutex::new(req)),
            call_timeout,
        })
    }

    #[instrument(skip(self, payload), fields(endpoint = %self.endpoint, method))]
    async fn call<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        payload: &Req,
    ) -> ClusterResult<Resp> {
        use zeromq::{SocketRecv, SocketSend};

        let envelope = RpcEnvelope {
            method: method.to_string(),
            body: rmp_serde::to_vec(payload)
                .map_err(|e| ClusterError::InvalidSpec(e.to_string()))?,
        };
        let frame = rmp_serde::to_vec(&envelope)
            .map_err(|e| ClusterError::InvalidSpec(e.to_string()))?;

        let mut sock = self.req.lock().await;
        let fut = async {
            sock.send(frame.into())
                .await
                .map_err(|e| ClusterError::ClusterUnavailable(e.to_string()))?;
            let reply = sock
                .recv()
                .await
                .map_err(|e| ClusterError::ClusterUnavailable(e.to_string()))?;
            let bytes: Vec<u8> = reply
                .get(0)
                .ok_or_else(|| ClusterError::ClusterUnavailable("empty reply".into()))?
                .to_vec();
            rmp_serde::from_slice::<RpcReply>(&bytes)
                .map_err(|e| ClusterError::ClusterUnavailable(e.to_string()))
        };

        let reply = tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| ClusterError::Timeout(self.call_timeout))??;

        if let Some(err) = reply.error {
            return Err(ClusterError::ClusterErrorCode {
                code: err.code,
                message: err.message,
            });
        }
        rmp_serde::from_slice(&reply.body)
            .map_err(|e| ClusterError::ClusterUnavailable(e.to_string()))
    }
}

#[derive(serde::Serialize)]
struct RpcEnvelope {
    method: String,
    body: Vec<u8>,
}

#[derive(serde::Deserialize)]
struct RpcReply {
    body: Vec<u8>,
    error: Option<WireError>,
}

#[async_trait]
impl ClusterClient for ZmqClusterTransport {
    async fn spawn_agent(&self, req: WireSpawnRequest) -> ClusterResult<WireSpawnResponse> {
        self.call("spawn_agent", &req).await
    }

    async fn kill_agent(&self, req: WireKillRequest) -> ClusterResult<WireKillResponse> {
        self.call("kill_agent", &req).await
    }

    async fn execute_command(
        &self,
        req: WireExecRequest,
    ) -> ClusterResult<BoxStream<'static, ClusterResult<ExecChunk>>> {
        // Exec output streams over a DEALER/ROUTER pair kept open for the
        // lifetime of the command; the first reply here carries the
        // stream's DEALER endpoint, which is then consumed chunk by chunk.
        let opened: ExecStreamHandle = self.call("execute_command", &req).await?;
        let endpoint = opened.stream_endpoint;
        let stream = async_stream::stream! {
            use zeromq::{Socket, SocketRecv};
            let mut sub = zeromq::DealerSocket::new();
            if let Err(e) = sub.connect(&endpoint).await {
                yield Err(ClusterError::ClusterUnavailable(e.to_string()));
                return;
            }
            loop {
                match sub.recv().await {
                    Ok(msg) => {
                        let Some(bytes) = msg.get(0) else { continue };
                        match rmp_serde::from_slice::<ExecChunk>(bytes) {
                            Ok(chunk) => {
                                let terminal = chunk.is_terminal();
                                yield Ok(chunk);
                                if terminal {
                                    break;
                                }
                            }
                            Err(e) => {
                                yield Err(ClusterError::ClusterUnavailable(e.to_string()));
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(ClusterError::ClusterUnavailable(e.to_string()));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn get_agent_status(&self, agent_id: &str) -> ClusterResult<WireAgentStatusResponse> {
        self.call("get_agent_status", &agent_id).await
    }

    async fn list_agents(&self) -> ClusterResult<Vec<WireAgentSummary>> {
        self.call("list_agents", &()).await
    }

    async fn heartbeat(&self, req: WireHeartbeatRequest) -> ClusterResult<WireHeartbeatResponse> {
        self.call("heartbeat", &req).await
    }

    async fn stream_events(
        &self,
        subscription: EventSubscription,
    ) -> ClusterResult<BoxStream<'static, FederationEvent>> {
        use zeromq::{Socket, SocketRecv};
        let mut sub = zeromq::SubSocket::new();
        sub.connect(&self.endpoint)
            .await
            .map_err(|e| ClusterError::ClusterUnavailable(e.to_string()))?;
        for kind in &subscription.event_types {
            sub.subscribe(kind)
                .await
                .map_err(|e| ClusterError::ClusterUnavailable(e.to_string()))?;
        }
        let agent_filter = subscription.agent_id_filter.clone();
        let stream = async_stream::stream! {
            loop {
                match sub.recv().await {
                    Ok(msg) => {
                        let Some(bytes) = msg.get(1).or_else(|| msg.get(0)) else { continue };
                        if let Ok(event) = rmp_serde::from_slice::<FederationEvent>(bytes) {
                            if let Some(filter) = &agent_filter {
                                if event.agent_id.as_deref() != Some(filter.as_str()) {
                                    continue;
                                }
                            }
                            yield event;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "cluster event stream closed");
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn export_agent(&self, req: WireExportRequest) -> ClusterResult<WireExportResponse> {
        self.call("export_agent", &req).await
    }

    async fn import_agent(&self, req: WireImportRequest) -> ClusterResult<WireImportResponse> {
        self.call("import_agent", &req).await
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ExecStreamHandle {
    stream_endpoint: String,
}

/// In-memory `ClusterClient` used by balancer/proxy tests and by the
/// `local` pseudo-cluster entry — no socket, no serialization round trip.
#[derive(Default)]
pub struct MockClusterClient {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    agents: HashMap<String, WireAgentSummary>,
    capacity: u32,
    fail_spawns: bool,
}

impl MockClusterClient {
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            state: Mutex::new(MockState {
                agents: HashMap::new(),
                capacity,
                fail_spawns: false,
            }),
        }
    }

    pub async fn set_fail_spawns(&self, fail: bool) {
        self.state.lock().await.fail_spawns = fail;
    }

    pub async fn agent_count(&self) -> usize {
        self.state.lock().await.agents.len()
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn spawn_agent(&self, req: WireSpawnRequest) -> ClusterResult<WireSpawnResponse> {
        let mut state = self.state.lock().await;
        if state.fail_spawns {
            return Err(ClusterError::ClusterUnavailable("mock configured to fail".into()));
        }
        if state.agents.len() as u32 >= state.capacity {
            return Err(ClusterError::CapacityExceeded("mock".into()));
        }
        if state.agents.contains_key(&req.agent_id) {
            return Err(ClusterError::AgentAlreadyExists(req.agent_id));
        }
        debug!(agent_id = %req.agent_id, "mock cluster spawning agent");
        state.agents.insert(
            req.agent_id.clone(),
            WireAgentSummary {
                agent_id: req.agent_id.clone(),
                status: AgentStatus::Running,
                model: req.model.clone(),
                started_at: chrono::Utc::now(),
                labels: req.labels.clone(),
            },
        );
        Ok(WireSpawnResponse {
            agent_id: req.agent_id,
            cluster_id: "mock".to_string(),
            endpoint: "mock://local".to_string(),
            status: AgentStatus::Running,
            error: None,
        })
    }

    async fn kill_agent(&self, req: WireKillRequest) -> ClusterResult<WireKillResponse> {
        let mut state = self.state.lock().await;
        let removed = state.agents.remove(&req.agent_id).is_some();
        Ok(WireKillResponse {
            success: removed,
            error: if removed {
                None
            } else {
                Some(WireError {
                    code: "not_found".into(),
                    message: format!("agent {} not found", req.agent_id),
                })
            },
        })
    }

    async fn execute_command(
        &self,
        _req: WireExecRequest,
    ) -> ClusterResult<BoxStream<'static, ClusterResult<ExecChunk>>> {
        let stream = async_stream::stream! {
            yield Ok(ExecChunk { output: "ok".into(), is_error: false, exit_code: None });
            yield Ok(ExecChunk { output: String::new(), is_error: false, exit_code: Some(0) });
        };
        Ok(Box::pin(stream))
    }

    async fn get_agent_status(&self, agent_id: &str) -> ClusterResult<WireAgentStatusResponse> {
        let state = self.state.lock().await;
        let agent = state
            .agents
            .get(agent_id)
            .ok_or_else(|| ClusterError::InvalidSpec(format!("unknown agent {agent_id}")))?;
        Ok(WireAgentStatusResponse {
            status: agent.status,
            started_at: agent.started_at,
            last_activity: agent.started_at,
            metadata: HashMap::new(),
        })
    }

    async fn list_agents(&self) -> ClusterResult<Vec<WireAgentSummary>> {
        Ok(self.state.lock().await.agents.values().cloned().collect())
    }

    async fn heartbeat(&self, _req: WireHeartbeatRequest) -> ClusterResult<WireHeartbeatResponse> {
        let state = self.state.lock().await;
        let active = state.agents.len() as u32;
        Ok(WireHeartbeatResponse {
            max_agents: state.capacity,
            available_agents: state.capacity.saturating_sub(active),
            active_agents: active,
            gpu_enabled: false,
            gpu_types: Vec::new(),
            cost_per_hour: 0.0,
            latency_ms: 1.0,
            capabilities: HashMap::new(),
        })
    }

    async fn stream_events(
        &self,
        _subscription: EventSubscription,
    ) -> ClusterResult<BoxStream<'static, FederationEvent>> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn export_agent(&self, req: WireExportRequest) -> ClusterResult<WireExportResponse> {
        Ok(WireExportResponse {
            success: true,
            agent_id: req.agent_id,
            state_data: vec![],
            metadata: HashMap::new(),
            error: None,
        })
    }

    async fn import_agent(&self, req: WireImportRequest) -> ClusterResult<WireImportResponse> {
        let mut state = self.state.lock().await;
        if state.agents.contains_key(&req.agent_id) {
            return Err(ClusterError::AgentAlreadyExists(req.agent_id));
        }
        state.agents.insert(
            req.agent_id.clone(),
            WireAgentSummary {
                agent_id: req.agent_id.clone(),
                status: AgentStatus::Running,
                model: "imported".to_string(),
                started_at: chrono::Utc::now(),
                labels: HashMap::new(),
            },
        );
        Ok(WireImportResponse {
            success: true,
            agent_id: req.agent_id,
            cluster_id: "mock".to_string(),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_rejects_spawn_past_capacity() {
        let client = MockClusterClient::with_capacity(1);
        let ok = client
            .spawn_agent(WireSpawnRequest {
                agent_id: "a1".into(),
                model: "m".into(),
                labels: HashMap::new(),
                timeout_seconds: 60,
                gpu_enabled: false,
                gpu_type: None,
                env_vars: HashMap::new(),
            })
            .await;
        assert!(ok.is_ok());

        let full = client
            .spawn_agent(WireSpawnRequest {
                agent_id: "a2".into(),
                model: "m".into(),
                labels: HashMap::new(),
                timeout_seconds: 60,
                gpu_enabled: false,
                gpu_type: None,
                env_vars: HashMap::new(),
            })
            .await;
        assert!(matches!(full, Err(ClusterError::CapacityExceeded(_))));
    }

    #[tokio::test]
    async fn import_onto_existing_agent_id_is_an_error() {
        let client = MockClusterClient::with_capacity(4);
        let req = || WireImportRequest {
            agent_id: "a1".into(),
            state_data: vec![],
            metadata: HashMap::new(),
            target_cluster: "b".into(),
        };
        client.import_agent(req()).await.unwrap();
        let second = client.import_agent(req()).await;
        assert!(matches!(second, Err(ClusterError::AgentAlreadyExists(_))));
    }

    #[tokio::test]
    async fn mock_rejects_duplicate_agent_id() {
        let client = MockClusterClient::with_capacity(4);
        let req = || WireSpawnRequest {
            agent_id: "dup".into(),
            model: "m".into(),
            labels: HashMap::new(),
            timeout_seconds: 60,
            gpu_enabled: false,
            gpu_type: None,
            env_vars: HashMap::new(),
        };
        client.spawn_agent(req()).await.unwrap();
        let second = client.spawn_agent(req()).await;
        assert!(matches!(second, Err(ClusterError::AgentAlreadyExists(_))));
    }
}
