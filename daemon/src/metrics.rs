//! Prometheus metrics collection and exposure.
//!
//! A `Registry`, one field per gauge/counter, `new()` registering each and
//! returning a typed `MetricsError` on failure, `gather_metrics()` rendering
//! the Prometheus text exposition format. The gauges/counters track this
//! control plane's own domain: clusters, agents, migrations, tasks.

use crate::errors::{DaemonError, DaemonResult};
use crate::types::{MetricsClusters, MetricsMessaging, MetricsResponse, MetricsTasks};
use chrono::Utc;
use prometheus::{Counter, IntGauge, Registry};
use std::sync::Arc;
use std::time::Instant;

pub struct MetricsCollector {
    registry: Arc<Registry>,

    pub clusters_registered: IntGauge,

    pub agents_spawned_total: Counter,
    pub agents_killed_total: Counter,
    pub agents_running: IntGauge,

    pub migrations_started_total: Counter,
    pub migrations_completed_total: Counter,
    pub migrations_failed_total: Counter,

    pub messages_sent_total: Counter,
    pub messages_urgent_total: Counter,

    pub tasks_open: IntGauge,
    pub tasks_done_total: Counter,

    server_start: Instant,
}

macro_rules! register_counter {
    ($registry:expr, $name:expr, $help:expr) => {{
        let metric = Counter::new($name, $help).map_err(|e| DaemonError::MetricsError(e.to_string()))?;
        $registry
            .register(Box::new(metric.clone()))
            .map_err(|e| DaemonError::MetricsError(e.to_string()))?;
        metric
    }};
}

macro_rules! register_gauge {
    ($registry:expr, $name:expr, $help:expr) => {{
        let metric = IntGauge::new($name, $help).map_err(|e| DaemonError::MetricsError(e.to_string()))?;
        $registry
            .register(Box::new(metric.clone()))
            .map_err(|e| DaemonError::MetricsError(e.to_string()))?;
        metric
    }};
}

impl MetricsCollector {
    pub fn new() -> DaemonResult<Self> {
        let registry = Arc::new(Registry::new());

        let clusters_registered = register_gauge!(registry, "clusters_registered", "Clusters known to the federation");
        let agents_spawned_total = register_counter!(registry, "agents_spawned_total", "Total agents spawned");
        let agents_killed_total = register_counter!(registry, "agents_killed_total", "Total agents killed");
        let agents_running = register_gauge!(registry, "agents_running", "Agents currently running");
        let migrations_started_total = register_counter!(registry, "migrations_started_total", "Total migrations started");
        let migrations_completed_total = register_counter!(registry, "migrations_completed_total", "Total migrations completed");
        let migrations_failed_total = register_counter!(registry, "migrations_failed_total", "Total migrations rolled back");
        let messages_sent_total = register_counter!(registry, "messages_sent_total", "Total agent messages delivered");
        let messages_urgent_total = register_counter!(registry, "messages_urgent_total", "Total high/urgent priority messages");
        let tasks_open = register_gauge!(registry, "tasks_open", "Tasks not yet done");
        let tasks_done_total = register_counter!(registry, "tasks_done_total", "Total tasks completed");

        Ok(Self {
            registry,
            clusters_registered,
            agents_spawned_total,
            agents_killed_total,
            agents_running,
            migrations_started_total,
            migrations_completed_total,
            migrations_failed_total,
            messages_sent_total,
            messages_urgent_total,
            tasks_open,
            tasks_done_total,
            server_start: Instant::now(),
        })
    }

    pub fn record_agent_spawn(&self) {
        self.agents_spawned_total.inc();
        self.agents_running.inc();
    }

    pub fn record_agent_kill(&self) {
        self.agents_killed_total.inc();
        self.agents_running.dec();
    }

    pub fn record_migration_started(&self) {
        self.migrations_started_total.inc();
    }

    pub fn record_migration_completed(&self) {
        self.migrations_completed_total.inc();
    }

    pub fn record_migration_failed(&self) {
        self.migrations_failed_total.inc();
    }

    pub fn record_message(&self, urgent: bool) {
        self.messages_sent_total.inc();
        if urgent {
            self.messages_urgent_total.inc();
        }
    }

    /// Render every registered metric in the Prometheus text exposition
    /// format, for a scrape endpoint to return verbatim.
    pub fn gather_metrics(&self) -> DaemonResult<String> {
        use prometheus::Encoder;
        let families = self.registry.gather();
        let mut buf = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&families, &mut buf)
            .map_err(|e| DaemonError::MetricsError(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| DaemonError::MetricsError(e.to_string()))
    }

    /// `active_clusters` is computed live by the caller from the cluster
    /// registry rather than tracked as its own gauge, since cluster health
    /// transitions happen inside `ClusterRegistry`, not through a metrics
    /// call the daemon could hook.
    pub fn get_metrics_response(&self, active_clusters: usize) -> MetricsResponse {
        MetricsResponse {
            clusters: MetricsClusters {
                registered: self.clusters_registered.get() as usize,
                active: active_clusters,
            },
            agents_running: self.agents_running.get() as usize,
            messaging: MetricsMessaging {
                sent_total: self.messages_sent_total.get() as u64,
                urgent_total: self.messages_urgent_total.get() as u64,
            },
            tasks: MetricsTasks {
                open: self.tasks_open.get() as usize,
                done_total: self.tasks_done_total.get() as u64,
            },
            uptime_secs: self.server_start.elapsed().as_secs(),
            timestamp: Utc::now(),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::error!("failed to create metrics collector: {e}");
            panic!("cannot create metrics collector");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_creation_gathers_cleanly() {
        let metrics = MetricsCollector::new().unwrap();
        assert!(metrics.gather_metrics().unwrap().contains("agents_running"));
    }

    #[test]
    fn agent_spawn_and_kill_track_running_gauge() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_agent_spawn();
        assert_eq!(metrics.agents_running.get(), 1);
        metrics.record_agent_kill();
        assert_eq!(metrics.agents_running.get(), 0);
    }

    #[test]
    fn urgent_message_increments_both_counters() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_message(true);
        assert_eq!(metrics.messages_sent_total.get(), 1.0);
        assert_eq!(metrics.messages_urgent_total.get(), 1.0);
    }
}
