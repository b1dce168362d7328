//! Core of the agent-orchestration control plane: cluster federation, load
//! balancing and routing, role/team composition, messaging, and the task
//! graph engine.
//!
//! The in-cluster agent runtime, CLI surface, configuration loading as a
//! pluggable system, authentication providers, and the LLM invocation layer
//! are all external collaborators this crate consumes through narrow traits
//! (`ClusterClient`, `LocalRuntime`) rather than implements.

pub mod agent;
pub mod balancer;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod events;
pub mod local_runtime;
pub mod messaging;
pub mod proxy;
pub mod roles;
pub mod tasks;
pub mod taskgraph;

pub use agent::{Agent, AgentListFilter, AgentSnapshot, AgentStatus, AgentStatusReport, SpawnRequest};
pub use balancer::{LoadBalancer, SpawnConfig};
pub use cluster::{Cluster, ClusterClient, ClusterRegistry, Criteria};
pub use config::OrchestratorConfig;
pub use events::{EventBus, EventEnvelope, EventKind};
pub use local_runtime::{InProcessRuntime, LocalRuntime};
pub use messaging::MessageBus;
pub use proxy::TransparentProxy;
pub use roles::RoleRegistry;
pub use tasks::TaskStore;

/// Everything wired together, the shape a daemon binary constructs once at
/// startup and shares across RPC handlers.
pub struct Orchestrator {
    pub config: OrchestratorConfig,
    pub events: EventBus,
    pub registry: std::sync::Arc<ClusterRegistry>,
    pub balancer: std::sync::Arc<LoadBalancer>,
    pub proxy: std::sync::Arc<TransparentProxy>,
    pub roles: std::sync::Arc<RoleRegistry>,
    pub messages: std::sync::Arc<MessageBus>,
    pub tasks: std::sync::Arc<TaskStore>,
}

impl Orchestrator {
    pub async fn new(config: OrchestratorConfig, local_runtime: std::sync::Arc<dyn LocalRuntime>) -> anyhow::Result<Self> {
        let events = EventBus::default();
        let registry = ClusterRegistry::new(events.clone(), config.health.clone());
        registry.start_health_loop();

        let balancer = LoadBalancer::new(registry.clone(), local_runtime.clone(), events.clone(), config.balancer.clone());
        let proxy = TransparentProxy::new(balancer.clone(), registry.clone(), local_runtime, events.clone());
        let roles = RoleRegistry::new(events.clone());
        let messages = MessageBus::new(roles.clone(), config.mailbox.clone(), events.clone());
        let tasks = std::sync::Arc::new(TaskStore::open(&config.task_store, events.clone()).await?);

        Ok(Self { config, events, registry, balancer, proxy, roles, messages, tasks })
    }

    /// Disposal: stops the health-probe loop. A real migration rollback
    /// deadline for pending migrations is left to the caller, since only it
    /// knows the acceptable shutdown window.
    pub fn shutdown(&self) {
        self.registry.stop_health_loop();
    }
}
