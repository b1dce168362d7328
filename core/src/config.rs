//! Control-plane tunables.
//!
//! This is deliberately small: "configuration loading" as a pluggable system
//! is an external collaborator. What lives here are the numbers the core
//! algorithms need — health probe cadence, balancer thresholds, mailbox
//! capacity, task-store lock staleness — loaded from TOML with serde
//! defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub degraded_threshold: u32,
    pub offline_threshold: u32,
    pub auto_remove_after_ms: Option<u64>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 10_000,
            probe_timeout_ms: 2_000,
            degraded_threshold: 2,
            offline_threshold: 5,
            auto_remove_after_ms: None,
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub local_floor: f64,
    pub max_spawn_attempts: u32,
    pub max_concurrent_migrations: usize,
    pub migration_verify_timeout_ms: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            local_floor: 40.0,
            max_spawn_attempts: 3,
            max_concurrent_migrations: 4,
            migration_verify_timeout_ms: 5_000,
        }
    }
}

impl BalancerConfig {
    pub fn migration_verify_timeout(&self) -> Duration {
        Duration::from_millis(self.migration_verify_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub max_messages: usize,
    pub enable_delivery_tracking: bool,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            max_messages: 1_000,
            enable_delivery_tracking: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskStoreConfig {
    pub base_path: std::path::PathBuf,
    pub lock_staleness_secs: u64,
}

impl Default for TaskStoreConfig {
    fn default() -> Self {
        Self {
            base_path: std::path::PathBuf::from(".orchestrator/tasks"),
            lock_staleness_secs: 30,
        }
    }
}

impl TaskStoreConfig {
    pub fn lock_staleness(&self) -> Duration {
        Duration::from_secs(self.lock_staleness_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub health: HealthConfig,
    pub balancer: BalancerConfig,
    pub mailbox: MailboxConfig,
    pub task_store: TaskStoreConfig,
}

impl OrchestratorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn load_from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = OrchestratorConfig::default();
        assert!(cfg.health.degraded_threshold < cfg.health.offline_threshold);
        assert!(cfg.balancer.max_spawn_attempts >= 1);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg = OrchestratorConfig::from_toml_str(
            r#"
            [health]
            probe_interval_ms = 5000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.health.probe_interval_ms, 5000);
        assert_eq!(cfg.health.offline_threshold, 5);
    }
}
