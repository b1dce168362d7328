//! Error types for the RPC daemon.
//!
//! One enum bridging every core component error into a JSON-RPC error
//! object via `to_rpc_error`, with variants wrapping the control-plane's
//! own typed errors (`ClusterError`, `BalancerError`, ...).

use orchestrator_core::errors::{
    BalancerError, ClusterError, LocalRuntimeError, MailboxError, ProxyError, RoleError,
    TaskGraphError, TaskStoreError,
};
use serde_json::json;
use thiserror::Error;

pub type DaemonResult<T> = Result<T, DaemonError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("authentication error: {0}")]
    AuthError(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("server error: {0}")]
    ServerError(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    LocalRuntime(#[from] LocalRuntimeError),

    #[error(transparent)]
    Balancer(#[from] BalancerError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Role(#[from] RoleError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    TaskGraph(#[from] TaskGraphError),

    #[error(transparent)]
    TaskStore(#[from] TaskStoreError),

    #[error("metrics error: {0}")]
    MetricsError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("{0}")]
    Other(String),
}

impl DaemonError {
    /// Convert to a JSON-RPC 2.0 error object: `-326xx` for protocol-level
    /// failures, a private block for domain errors.
    pub fn to_rpc_error(&self) -> serde_json::Value {
        let (code, message) = self.code_and_message();
        json!({ "code": code, "message": message })
    }

    pub fn code(&self) -> i64 {
        self.code_and_message().0
    }

    fn code_and_message(&self) -> (i64, String) {
        match self {
            DaemonError::ConfigError(m) => (-32600, format!("invalid configuration: {m}")),
            DaemonError::AuthError(m) => (-32001, format!("authentication failed: {m}")),
            DaemonError::MethodNotFound(m) => (-32601, format!("method not found: {m}")),
            DaemonError::InvalidRequest(m) => (-32602, format!("invalid params: {m}")),
            DaemonError::ServerError(m) => (-32603, format!("internal server error: {m}")),
            DaemonError::Cluster(e) => (-32010, e.to_string()),
            DaemonError::LocalRuntime(e) => (-32011, e.to_string()),
            DaemonError::Balancer(e) => (-32012, e.to_string()),
            DaemonError::Proxy(e) => (-32013, e.to_string()),
            DaemonError::Role(e) => (-32014, e.to_string()),
            DaemonError::Mailbox(e) => (-32015, e.to_string()),
            DaemonError::TaskGraph(e) => (-32016, e.to_string()),
            DaemonError::TaskStore(e) => (-32017, e.to_string()),
            DaemonError::MetricsError(m) => (-32018, format!("metrics error: {m}")),
            DaemonError::IoError(e) => (-32603, format!("io error: {e}")),
            DaemonError::SerializationError(m) => (-32700, format!("serialization error: {m}")),
            DaemonError::Other(m) => (-32000, m.clone()),
        }
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::SerializationError(e.to_string())
    }
}

impl From<String> for DaemonError {
    fn from(e: String) -> Self {
        DaemonError::Other(e)
    }
}

impl From<&str> for DaemonError {
    fn from(e: &str) -> Self {
        DaemonError::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_not_found_maps_to_jsonrpc_32601() {
        let err = DaemonError::MethodNotFound("agent.teleport".into());
        assert_eq!(err.code(), -32601);
    }

    #[test]
    fn domain_error_round_trips_through_from() {
        let err: DaemonError = ClusterError::ClusterUnavailable("east".into()).into();
        assert!(matches!(err, DaemonError::Cluster(_)));
    }
}
