//! Unix-socket JSON-RPC transport.
//!
//! Bind, accept loop, one connection per request (`read_line` in, one
//! write + shutdown out), a `oneshot` for graceful stop. `dispatch` rides
//! on top of the accept loop, along with a periodic background sweep of
//! stale task locks, since this control plane owns lock files a client
//! might have abandoned mid-hold.

use crate::config::DaemonConfig;
use crate::errors::{DaemonError, DaemonResult};
use crate::events::EventPublisher;
use crate::metrics::MetricsCollector;
use crate::rpc::RpcServerImpl;
use crate::types::{RpcRequest, RpcResponse};
use orchestrator_core::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

pub struct UnixSocketRpcServer {
    socket_path: PathBuf,
    server_impl: Arc<RpcServerImpl>,
}

pub struct ServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    reclaim_tx: Option<oneshot::Sender<()>>,
}

impl ServerHandle {
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(tx) = self.reclaim_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl UnixSocketRpcServer {
    pub fn new(
        config: &DaemonConfig,
        orchestrator: Arc<Orchestrator>,
        auth: Arc<crate::auth::AuthManager>,
        metrics: Arc<MetricsCollector>,
        events: Arc<EventPublisher>,
    ) -> Self {
        Self {
            socket_path: config.rpc.socket_path.clone(),
            server_impl: Arc::new(RpcServerImpl::new(orchestrator, auth, metrics, events)),
        }
    }

    pub async fn start(&self, orchestrator: Arc<Orchestrator>) -> DaemonResult<ServerHandle> {
        if self.socket_path.exists() {
            info!(path = ?self.socket_path, "removing stale socket file");
            std::fs::remove_file(&self.socket_path)
                .map_err(|e| DaemonError::ServerError(format!("failed to remove existing socket: {e}")))?;
        }
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DaemonError::ServerError(format!("failed to create socket directory: {e}")))?;
            }
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| DaemonError::ServerError(format!("failed to bind unix socket: {e}")))?;
        info!(path = ?self.socket_path, "rpc server listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server_impl = Arc::clone(&self.server_impl);
        let socket_path = self.socket_path.clone();
        tokio::spawn(Self::run_listener(listener, server_impl, socket_path, shutdown_rx));

        let (reclaim_tx, reclaim_rx) = oneshot::channel();
        tokio::spawn(Self::run_lock_reclaim(orchestrator, reclaim_rx));

        Ok(ServerHandle { shutdown_tx: Some(shutdown_tx), reclaim_tx: Some(reclaim_tx) })
    }

    async fn run_listener(
        listener: UnixListener,
        server_impl: Arc<RpcServerImpl>,
        socket_path: PathBuf,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("shutting down unix rpc server");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let impl_clone = Arc::clone(&server_impl);
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, impl_clone).await {
                                    error!(error = %e, "rpc connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "rpc accept error");
                            break;
                        }
                    }
                }
            }
        }
        if let Err(e) = tokio::fs::remove_file(&socket_path).await {
            warn!(error = %e, path = ?socket_path, "failed to remove socket file on shutdown");
        }
    }

    async fn handle_connection(stream: UnixStream, server_impl: Arc<RpcServerImpl>) -> DaemonResult<()> {
        let mut reader = BufReader::new(stream);
        let mut payload = String::new();
        let bytes_read = reader
            .read_line(&mut payload)
            .await
            .map_err(|e| DaemonError::ServerError(format!("failed to read rpc request: {e}")))?;
        if bytes_read == 0 {
            return Ok(());
        }

        let response = Self::handle_payload(server_impl, payload.trim()).await;
        let mut stream = reader.into_inner();
        stream
            .write_all(response.as_bytes())
            .await
            .map_err(|e| DaemonError::ServerError(format!("failed to write rpc response: {e}")))?;
        stream
            .write_all(b"\n")
            .await
            .map_err(|e| DaemonError::ServerError(format!("failed to write rpc terminator: {e}")))?;
        stream.shutdown().await.map_err(|e| DaemonError::ServerError(format!("failed to shut down stream: {e}")))?;
        Ok(())
    }

    async fn handle_payload(server_impl: Arc<RpcServerImpl>, payload: &str) -> String {
        if payload.is_empty() {
            return serde_json::to_string(&RpcResponse::error(-32600, "invalid request".to_string(), None)).unwrap();
        }
        match serde_json::from_str::<RpcRequest>(payload) {
            Ok(request) => serde_json::to_string(&server_impl.dispatch(request).await).unwrap_or_else(|e| {
                serde_json::to_string(&RpcResponse::error(-32603, format!("serialization error: {e}"), None)).unwrap()
            }),
            Err(_) => serde_json::to_string(&RpcResponse::error(-32700, "parse error".to_string(), None)).unwrap(),
        }
    }

    /// Periodic sweep so a lock file whose holder crashed mid-hold doesn't
    /// wedge that task forever (SPEC_FULL §11).
    async fn run_lock_reclaim(orchestrator: Arc<Orchestrator>, mut stop_rx: oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = interval.tick() => {
                    match orchestrator.tasks.reclaim_stale_locks().await {
                        Ok(0) => {}
                        Ok(n) => info!(reclaimed = n, "swept stale task locks"),
                        Err(e) => warn!(error = %e, "stale lock sweep failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthManager;
    use crate::config::AuthConfig;
    use orchestrator_core::config::OrchestratorConfig;
    use orchestrator_core::local_runtime::InProcessRuntime;

    #[tokio::test]
    async fn starts_and_accepts_one_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut config = DaemonConfig::default();
        config.rpc.socket_path = socket_path.clone();

        let orchestrator =
            Arc::new(Orchestrator::new(OrchestratorConfig::default(), InProcessRuntime::new(4)).await.unwrap());
        let auth = Arc::new(AuthManager::new(AuthConfig { enabled: false, jwt_secret: "x".into() }));
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let events = Arc::new(EventPublisher::bind("127.0.0.1", 0).await.unwrap());

        let server = UnixSocketRpcServer::new(&config, orchestrator.clone(), auth, metrics, events);
        let mut handle = server.start(orchestrator).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        stream.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"health.check\",\"id\":1}\n").await.unwrap();

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.contains("\"status\":\"ok\""));

        handle.stop();
    }
}
