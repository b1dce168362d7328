//! Daemon process configuration.
//!
//! Nested per-concern structs, serde defaults, TOML load, trimmed to what
//! this control plane process actually owns: the Unix-socket RPC transport,
//! the ZMQ event publisher, metrics exposure, auth, and the embedded
//! `OrchestratorConfig`. Configuration loading as a pluggable system stays
//! an external collaborator — this is just the numbers.

use crate::errors::{DaemonError, DaemonResult};
use orchestrator_core::config::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub rpc: RpcConfig,
    pub events: EventConfig,
    pub metrics: MetricsConfig,
    pub auth: AuthConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            events: EventConfig::default(),
            metrics: MetricsConfig::default(),
            auth: AuthConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

/// The JSON-RPC 2.0 transport: one Unix socket, one request per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub socket_path: PathBuf,
    pub request_timeout_secs: u64,
    pub max_connections: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/orchestrator-daemon.sock"),
            request_timeout_secs: 30,
            max_connections: 1000,
        }
    }
}

/// ZMQ PUB endpoint the control plane re-broadcasts `EventEnvelope`s on,
/// one topic per event kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { bind_addr: "127.0.0.1".to_string(), port: 8090 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_addr: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, bind_addr: "127.0.0.1".to_string(), port: 9090 }
    }
}

/// Authentication is an external collaborator: this struct only configures
/// how the daemon turns a bearer token it is handed into an opaque
/// principal, not how that token was issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { enabled: false, jwt_secret: "change-me-in-production".to_string() }
    }
}

impl DaemonConfig {
    pub fn load(path: &std::path::Path) -> DaemonResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::ConfigError(format!("reading {path:?}: {e}")))?;
        toml::from_str(&contents).map_err(|e| DaemonError::ConfigError(format!("parsing {path:?}: {e}")))
    }

    pub fn load_or_default(path: Option<&std::path::Path>) -> DaemonResult<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> DaemonResult<()> {
        if self.rpc.max_connections == 0 {
            return Err(DaemonError::ConfigError("rpc.max_connections must be > 0".into()));
        }
        if self.auth.enabled && self.auth.jwt_secret == "change-me-in-production" {
            return Err(DaemonError::ConfigError(
                "auth.jwt_secret must be changed from the default when auth is enabled".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DaemonConfig::default().validate().is_ok());
    }

    #[test]
    fn auth_enabled_with_default_secret_is_rejected() {
        let mut cfg = DaemonConfig::default();
        cfg.auth.enabled = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: DaemonConfig = toml::from_str(
            r#"
            [rpc]
            socket_path = "/tmp/custom.sock"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.rpc.socket_path, PathBuf::from("/tmp/custom.sock"));
        assert_eq!(cfg.metrics.port, 9090);
    }
}
