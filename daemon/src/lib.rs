//! Orchestrator daemon: exposes `orchestrator-core`'s control plane over a
//! JSON-RPC 2.0 Unix socket, re-broadcasts its event bus over ZMQ PUB, and
//! reports Prometheus metrics.

pub mod auth;
pub mod config;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod rpc;
pub mod server;
pub mod types;

pub use auth::{AuthManager, Principal};
pub use config::DaemonConfig;
pub use errors::{DaemonError, DaemonResult};
pub use events::EventPublisher;
pub use metrics::MetricsCollector;
pub use rpc::RpcServerImpl;
pub use server::{ServerHandle, UnixSocketRpcServer};
pub use types::{RpcRequest, RpcResponse};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
