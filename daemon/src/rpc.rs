//! RPC method implementations.
//!
//! One `_internal` async method per RPC call, each owning exactly its slice
//! of domain logic and translating the core's typed errors into
//! `DaemonError` through `?` (every variant already has a `#[from]`).
//! `dispatch` below uses one generic `parse_params::<T>` helper rather than
//! a hand-written parser per method, since every param struct here already
//! derives
//! `Deserialize` and the per-method hand-written parsers added nothing
//! `serde_json::from_value` doesn't already do.

use crate::auth::{AuthManager, Principal};
use crate::errors::{DaemonError, DaemonResult};
use crate::events::EventPublisher;
use crate::metrics::MetricsCollector;
use crate::types::*;
use orchestrator_core::agent::AgentListFilter;
use orchestrator_core::balancer::SpawnConfig;
use orchestrator_core::cluster::{Capabilities, Cluster, Criteria, SelectionPriority};
use orchestrator_core::cluster::client::{MockClusterClient, ZmqClusterTransport};
use orchestrator_core::messaging::{MessagePriority, MessageType};
use orchestrator_core::roles::{Complexity, Role, RoleAssignment, TeamRequirements};
use orchestrator_core::taskgraph::{self, DecompositionContext, Strategy};
use orchestrator_core::tasks::{Task, TaskList, TaskPriority};
use orchestrator_core::Orchestrator;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct RpcServerImpl {
    orchestrator: Arc<Orchestrator>,
    auth: Arc<AuthManager>,
    pub metrics: Arc<MetricsCollector>,
    pub events: Arc<EventPublisher>,
    start: Instant,
}

fn parse_params<T: DeserializeOwned>(request: &RpcRequest) -> Result<T, RpcResponse> {
    let value = request.params.clone().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| {
        RpcResponse::error(-32602, format!("invalid params: {e}"), request.id.clone())
    })
}

fn ok(value: Value, id: Option<Value>) -> RpcResponse {
    RpcResponse::success(value, id)
}

fn err(e: DaemonError, id: Option<Value>) -> RpcResponse {
    let rpc_err = e.to_rpc_error();
    RpcResponse::error(
        rpc_err["code"].as_i64().unwrap_or(-32000),
        rpc_err["message"].as_str().unwrap_or("internal error").to_string(),
        id,
    )
}

fn to_value<T: serde::Serialize>(v: T, id: Option<Value>) -> RpcResponse {
    match serde_json::to_value(v) {
        Ok(value) => ok(value, id),
        Err(e) => RpcResponse::error(-32603, format!("serialization error: {e}"), id),
    }
}

fn priority_from_str(s: &str) -> MessagePriority {
    match s {
        "low" => MessagePriority::Low,
        "high" => MessagePriority::High,
        "urgent" => MessagePriority::Urgent,
        _ => MessagePriority::Normal,
    }
}

fn message_type_from_str(s: &str) -> MessageType {
    match s {
        "task" => MessageType::Task,
        "status" => MessageType::Status,
        "result" => MessageType::Result,
        "alert" => MessageType::Alert,
        "query" => MessageType::Query,
        "feedback" => MessageType::Feedback,
        "system" => MessageType::System,
        "error" => MessageType::Error,
        _ => MessageType::Message,
    }
}

fn task_priority_from_str(s: &str) -> TaskPriority {
    match s {
        "low" => TaskPriority::Low,
        "high" => TaskPriority::High,
        "critical" => TaskPriority::Critical,
        _ => TaskPriority::Medium,
    }
}

fn strategy_from_str(s: &str) -> Strategy {
    match s {
        "file-based" => Strategy::FileBased,
        "domain-based" => Strategy::DomainBased,
        "llm-assisted" => Strategy::LlmAssisted,
        _ => Strategy::ComponentBased,
    }
}

fn complexity_from_str(s: &str) -> Complexity {
    match s {
        "low" => Complexity::Low,
        "high" => Complexity::High,
        _ => Complexity::Medium,
    }
}

fn selection_priority_from_str(s: &str) -> SelectionPriority {
    match s {
        "latency" => SelectionPriority::Latency,
        "cost" => SelectionPriority::Cost,
        "gpu" => SelectionPriority::Gpu,
        _ => SelectionPriority::Availability,
    }
}

impl RpcServerImpl {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        auth: Arc<AuthManager>,
        metrics: Arc<MetricsCollector>,
        events: Arc<EventPublisher>,
    ) -> Self {
        Self { orchestrator, auth, metrics, events, start: Instant::now() }
    }

    fn authenticate(&self, request: &RpcRequest) -> DaemonResult<Option<Principal>> {
        self.auth.authenticate(request.auth_token.as_deref())
    }

    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        let principal = match self.authenticate(&request) {
            Ok(p) => p,
            Err(e) => return err(e, id),
        };

        match request.method.as_str() {
            "cluster.register" => self.handle(request, Self::cluster_register_internal).await,
            "cluster.unregister" => self.handle(request, Self::cluster_unregister_internal).await,
            "cluster.select" => self.handle(request, Self::cluster_select_internal).await,
            "cluster.list" => self.handle_no_params(request, Self::cluster_list_internal).await,

            "agent.spawn" => self.handle(request, Self::agent_spawn_internal).await,
            "agent.exec" => self.handle(request, Self::agent_exec_internal).await,
            "agent.kill" => self.handle(request, Self::agent_kill_internal).await,
            "agent.status" => self.handle(request, Self::agent_status_internal).await,
            "agent.list" => self.handle(request, Self::agent_list_internal).await,
            "agent.migrate" => self.handle(request, Self::agent_migrate_internal).await,

            "role.register" => self.handle(request, Self::role_register_internal).await,
            "role.list" => self.handle_no_params(request, Self::role_list_internal).await,
            "role.assign" => self.handle(request, Self::role_assign_internal).await,
            "role.unassign" => self.handle(request, Self::role_unassign_internal).await,
            "role.composeTeam" => self.handle(request, Self::role_compose_team_internal).await,

            "message.send" => {
                let principal_clone = principal.clone();
                self.handle_with_principal(request, principal_clone, Self::message_send_internal).await
            }
            "message.broadcast" => self.handle(request, Self::message_broadcast_internal).await,
            "message.sendToRole" => self.handle(request, Self::message_send_to_role_internal).await,
            "message.mailbox" => self.handle(request, Self::message_mailbox_internal).await,

            "task.decompose" => self.handle(request, Self::task_decompose_internal).await,
            "task.list.create" => self.handle(request, Self::task_list_create_internal).await,
            "task.create" => self.handle(request, Self::task_create_internal).await,
            "task.complete" => self.handle(request, Self::task_complete_internal).await,
            "task.delete" => self.handle(request, Self::task_delete_internal).await,
            "task.addDependency" => self.handle(request, Self::task_add_dependency_internal).await,
            "task.list.get" => self.handle(request, Self::task_list_get_internal).await,
            "task.hydrate" => self.handle(request, Self::task_hydrate_internal).await,
            "task.sync" => self.handle(request, Self::task_sync_internal).await,

            "health.check" => self.handle_no_params(request, Self::health_check_internal).await,
            "metrics.get" => self.handle_no_params(request, Self::metrics_get_internal).await,

            other => err(DaemonError::MethodNotFound(other.to_string()), id),
        }
    }

    async fn handle<P, F, Fut>(&self, request: RpcRequest, f: F) -> RpcResponse
    where
        P: DeserializeOwned,
        F: FnOnce(&Self, P) -> Fut,
        Fut: std::future::Future<Output = DaemonResult<Value>>,
    {
        let id = request.id.clone();
        let params = match parse_params::<P>(&request) {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        match f(self, params).await {
            Ok(value) => ok(value, id),
            Err(e) => err(e, id),
        }
    }

    async fn handle_with_principal<P, F, Fut>(&self, request: RpcRequest, principal: Option<Principal>, f: F) -> RpcResponse
    where
        P: DeserializeOwned,
        F: FnOnce(&Self, P, Option<Principal>) -> Fut,
        Fut: std::future::Future<Output = DaemonResult<Value>>,
    {
        let id = request.id.clone();
        let params = match parse_params::<P>(&request) {
            Ok(p) => p,
            Err(resp) => return resp,
        };
        match f(self, params, principal).await {
            Ok(value) => ok(value, id),
            Err(e) => err(e, id),
        }
    }

    async fn handle_no_params<F, Fut>(&self, request: RpcRequest, f: F) -> RpcResponse
    where
        F: FnOnce(&Self) -> Fut,
        Fut: std::future::Future<Output = DaemonResult<Value>>,
    {
        let id = request.id.clone();
        match f(self).await {
            Ok(value) => ok(value, id),
            Err(e) => err(e, id),
        }
    }

    // -----------------------------------------------------------------
    // cluster.*
    // -----------------------------------------------------------------

    async fn cluster_register_internal(&self, p: ClusterRegisterParams) -> DaemonResult<Value> {
        let mut capabilities = Capabilities {
            max_agents: p.max_agents,
            gpu_enabled: p.gpu_enabled,
            gpu_types: p.gpu_types.into_iter().collect(),
            cost_per_hour: p.cost_per_hour,
            latency_ms: p.latency_ms,
            ..Default::default()
        };
        capabilities.normalize();

        let mut cluster = Cluster::new(p.id.clone(), p.name, p.endpoint.clone());
        cluster.capabilities = capabilities;
        if let Some(region) = p.region {
            cluster.region = orchestrator_core::cluster::Region::Other(region);
        }

        let client: Arc<dyn orchestrator_core::cluster::ClusterClient> = if p.connect {
            Arc::new(ZmqClusterTransport::connect(&p.endpoint, Duration::from_secs(5)).await?)
        } else {
            Arc::new(MockClusterClient::with_capacity(p.max_agents))
        };

        self.orchestrator.registry.register(cluster, client)?;
        self.metrics.clusters_registered.inc();
        Ok(json!({ "id": p.id }))
    }

    async fn cluster_unregister_internal(&self, p: ClusterUnregisterParams) -> DaemonResult<Value> {
        self.orchestrator.registry.unregister(&p.cluster_id)?;
        self.metrics.clusters_registered.dec();
        Ok(Value::Null)
    }

    async fn cluster_select_internal(&self, p: ClusterSelectParams) -> DaemonResult<Value> {
        let criteria = Criteria {
            priority: p.priority.as_deref().map(selection_priority_from_str),
            min_agents: p.min_agents,
            requires_gpu: p.requires_gpu,
            gpu_type: p.gpu_type,
            max_latency_ms: p.max_latency_ms,
            max_cost_per_hour: p.max_cost_per_hour,
        };
        let selected = self.orchestrator.registry.select(&criteria);
        Ok(serde_json::to_value(selected).unwrap_or(Value::Null))
    }

    async fn cluster_list_internal(&self) -> DaemonResult<Value> {
        let clusters = self.orchestrator.registry.list_by_status(orchestrator_core::cluster::ClusterStatus::Active);
        Ok(serde_json::to_value(clusters)?)
    }

    // -----------------------------------------------------------------
    // agent.*
    // -----------------------------------------------------------------

    async fn agent_spawn_internal(&self, p: AgentSpawnParams) -> DaemonResult<Value> {
        let config = SpawnConfig {
            model: p.model,
            requires_gpu: p.requires_gpu,
            gpu_type: p.gpu_type,
            priority: p.priority.as_deref().map(selection_priority_from_str),
            prefer_local: p.prefer_local,
            labels: p.labels,
            env_vars: p.env_vars,
            timeout_seconds: p.timeout_seconds,
        };
        let agent = self.orchestrator.proxy.spawn(config).await?;
        self.metrics.record_agent_spawn();
        self.orchestrator.messages.register_agent(&agent.id, None);
        Ok(serde_json::to_value(agent)?)
    }

    async fn agent_exec_internal(&self, p: AgentExecParams) -> DaemonResult<Value> {
        let (output, exit_code) = self.orchestrator.proxy.exec(&p.agent_id, &p.command).await?;
        Ok(serde_json::to_value(AgentExecResult { output, exit_code })?)
    }

    async fn agent_kill_internal(&self, p: AgentKillParams) -> DaemonResult<Value> {
        self.orchestrator.proxy.kill(&p.agent_id, p.force).await?;
        self.metrics.record_agent_kill();
        self.orchestrator.messages.unregister_agent(&p.agent_id);
        Ok(Value::Null)
    }

    async fn agent_status_internal(&self, p: AgentIdParams) -> DaemonResult<Value> {
        let status = self.orchestrator.proxy.status(&p.agent_id).await?;
        Ok(serde_json::to_value(status)?)
    }

    async fn agent_list_internal(&self, p: AgentListParams) -> DaemonResult<Value> {
        let filter = AgentListFilter {
            status: p.status.as_deref().and_then(parse_agent_status),
            label_selector: p.label_selector,
        };
        let agents = self.orchestrator.proxy.list(&filter).await;
        Ok(serde_json::to_value(agents)?)
    }

    async fn agent_migrate_internal(&self, p: AgentMigrateParams) -> DaemonResult<Value> {
        self.metrics.record_migration_started();
        match self.orchestrator.proxy.migrate(&p.agent_id, &p.to_cluster).await {
            Ok(()) => {
                self.metrics.record_migration_completed();
                Ok(Value::Null)
            }
            Err(e) => {
                self.metrics.record_migration_failed();
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------
    // role.*
    // -----------------------------------------------------------------

    async fn role_register_internal(&self, p: RoleRegisterParams) -> DaemonResult<Value> {
        let role = Role {
            id: p.id.clone(),
            display_name: p.display_name,
            description: p.description,
            system_prompt: p.system_prompt,
            capabilities: p.capabilities.into_iter().collect(),
            permissions: p.permissions.into_iter().collect(),
            max_iterations: p.max_iterations,
            can_message: p.can_message.into_iter().collect(),
            cost_budget: p.cost_budget,
            ..Default::default()
        };
        self.orchestrator.roles.register_role(role)?;
        Ok(json!({ "id": p.id }))
    }

    async fn role_list_internal(&self) -> DaemonResult<Value> {
        Ok(serde_json::to_value(self.orchestrator.roles.list_roles())?)
    }

    async fn role_assign_internal(&self, p: RoleAssignParams) -> DaemonResult<Value> {
        let assignment = RoleAssignment {
            agent_id: p.agent_id.clone(),
            role_id: p.role_id,
            team_id: p.team_id,
            worktree_id: p.worktree_id,
            assigned_at: chrono::Utc::now(),
            assigned_by: p.assigned_by,
            expires_at: p.expires_at,
        };
        self.orchestrator.roles.assign(assignment)?;
        Ok(Value::Null)
    }

    async fn role_unassign_internal(&self, p: AgentIdParams) -> DaemonResult<Value> {
        self.orchestrator.roles.unassign(&p.agent_id)?;
        Ok(Value::Null)
    }

    async fn role_compose_team_internal(&self, p: ComposeTeamParams) -> DaemonResult<Value> {
        let reqs = TeamRequirements {
            task: p.task,
            complexity: complexity_from_str(&p.complexity),
            estimated_subtasks: p.estimated_subtasks,
            security_sensitive: p.security_sensitive,
            requires_review: p.requires_review,
            requires_monitoring: p.requires_monitoring,
            requires_integration: p.requires_integration,
        };
        let proposal = self.orchestrator.roles.compose_team(&reqs);
        Ok(json!({
            "coordinatorCount": proposal.coordinator_count,
            "workerCount": proposal.worker_count,
            "reviewerCount": proposal.reviewer_count,
            "monitorCount": proposal.monitor_count,
            "refineryCount": proposal.refinery_count,
            "estimatedBudget": proposal.estimated_budget,
        }))
    }

    // -----------------------------------------------------------------
    // message.*
    // -----------------------------------------------------------------

    async fn message_send_internal(&self, p: MessageSendParams, _principal: Option<Principal>) -> DaemonResult<Value> {
        let urgent = p.priority == "urgent" || p.priority == "high";
        let id = self
            .orchestrator
            .messages
            .send(&p.from, &p.to, message_type_from_str(&p.message_type), p.content, priority_from_str(&p.priority))
            .await?;
        self.metrics.record_message(urgent);
        Ok(json!({ "messageId": id }))
    }

    async fn message_broadcast_internal(&self, p: MessageBroadcastParams) -> DaemonResult<Value> {
        let urgent = p.priority == "urgent" || p.priority == "high";
        let count = self.orchestrator.messages.broadcast(&p.from, p.content, priority_from_str(&p.priority)).await;
        for _ in 0..count {
            self.metrics.record_message(urgent);
        }
        Ok(json!({ "delivered": count }))
    }

    async fn message_send_to_role_internal(&self, p: MessageSendToRoleParams) -> DaemonResult<Value> {
        let urgent = p.priority == "urgent" || p.priority == "high";
        let count = self.orchestrator.messages.send_to_role(&p.from, &p.role, p.content, priority_from_str(&p.priority)).await;
        for _ in 0..count {
            self.metrics.record_message(urgent);
        }
        Ok(json!({ "delivered": count }))
    }

    async fn message_mailbox_internal(&self, p: MailboxParams) -> DaemonResult<Value> {
        let Some(mailbox) = self.orchestrator.messages.mailbox(&p.agent_id) else {
            return Err(DaemonError::InvalidRequest(format!("no mailbox for agent {}", p.agent_id)));
        };
        let messages = mailbox.list().await;
        Ok(serde_json::to_value(messages)?)
    }

    // -----------------------------------------------------------------
    // task.*
    // -----------------------------------------------------------------

    async fn task_decompose_internal(&self, p: TaskDecomposeParams) -> DaemonResult<Value> {
        let ctx = DecompositionContext { files: p.files, max_parallelism: p.max_parallelism };
        let result = taskgraph::decompose(&p.task, strategy_from_str(&p.strategy), &ctx)?;
        Ok(json!({
            "subtasks": result.subtasks,
            "levels": result.levels,
            "parallelizationRatio": result.parallelization_ratio,
            "strategyUsed": result.strategy_used.as_str(),
            "timestamp": result.timestamp,
        }))
    }

    async fn task_list_create_internal(&self, p: TaskListCreateParams) -> DaemonResult<Value> {
        self.orchestrator.tasks.create_list(TaskList::new(p.id.clone(), p.name)).await?;
        Ok(json!({ "id": p.id }))
    }

    async fn task_create_internal(&self, p: TaskCreateParams) -> DaemonResult<Value> {
        let mut task = Task::new(p.id.clone(), p.title);
        task.description = p.description;
        task.priority = task_priority_from_str(&p.priority);
        task.task_type = p.task_type;
        task.tags = p.tags;
        self.orchestrator.tasks.create_task(&p.list_id, task).await?;
        let open = self.orchestrator.tasks.get_list(&p.list_id).await.map(|l| l.task_ids.len()).unwrap_or(0);
        self.metrics.tasks_open.set(open as i64);
        Ok(json!({ "id": p.id }))
    }

    async fn task_complete_internal(&self, p: TaskIdParams) -> DaemonResult<Value> {
        self.orchestrator.tasks.complete_task(&p.task_id).await?;
        self.metrics.tasks_done_total.inc();
        Ok(Value::Null)
    }

    async fn task_delete_internal(&self, p: TaskIdParams) -> DaemonResult<Value> {
        self.orchestrator.tasks.delete_task(&p.task_id).await?;
        Ok(Value::Null)
    }

    async fn task_add_dependency_internal(&self, p: TaskAddDependencyParams) -> DaemonResult<Value> {
        self.orchestrator.tasks.add_dependency(&p.task_id, &p.depends_on_id).await?;
        Ok(Value::Null)
    }

    async fn task_list_get_internal(&self, p: TaskListIdParams) -> DaemonResult<Value> {
        let Some(list) = self.orchestrator.tasks.get_list(&p.list_id).await else {
            return Err(DaemonError::InvalidRequest(format!("task list {} not found", p.list_id)));
        };
        let mut tasks = Vec::with_capacity(list.task_ids.len());
        for id in &list.task_ids {
            if let Some(task) = self.orchestrator.tasks.get_task(id).await {
                tasks.push(task);
            }
        }
        Ok(json!({ "list": list, "tasks": tasks }))
    }

    async fn task_hydrate_internal(&self, p: TaskHydrateParams) -> DaemonResult<Value> {
        let options = orchestrator_core::tasks::hydrate::HydrationOptions { skip_completed: p.skip_completed };
        let hydrated = orchestrator_core::tasks::hydrate::hydrate(&p.markdown, &options);
        let mut created = Vec::with_capacity(hydrated.len());
        for h in hydrated {
            self.orchestrator.tasks.create_task(&p.list_id, h.task.clone()).await?;
            created.push(h.task.id);
        }
        Ok(json!({ "created": created }))
    }

    async fn task_sync_internal(&self, p: TaskSyncParams) -> DaemonResult<Value> {
        let Some(list) = self.orchestrator.tasks.get_list(&p.list_id).await else {
            return Err(DaemonError::InvalidRequest(format!("task list {} not found", p.list_id)));
        };
        let mut tasks = Vec::with_capacity(list.task_ids.len());
        for id in &list.task_ids {
            if let Some(task) = self.orchestrator.tasks.get_task(id).await {
                tasks.push(task);
            }
        }
        let markdown = match p.original {
            Some(original) => orchestrator_core::tasks::sync::sync_in_place(&original, &tasks),
            None => {
                let pairs: Vec<(Option<String>, Task)> = tasks.into_iter().map(|t| (None, t)).collect();
                orchestrator_core::tasks::sync::sync_full(&list.name, &pairs)
            }
        };
        Ok(json!({ "markdown": markdown }))
    }

    // -----------------------------------------------------------------
    // health / metrics
    // -----------------------------------------------------------------

    async fn health_check_internal(&self) -> DaemonResult<Value> {
        Ok(serde_json::to_value(HealthCheckResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.start.elapsed().as_secs(),
            timestamp: chrono::Utc::now(),
        })?)
    }

    async fn metrics_get_internal(&self) -> DaemonResult<Value> {
        let active = self
            .orchestrator
            .registry
            .list_by_status(orchestrator_core::cluster::ClusterStatus::Active)
            .len();
        Ok(serde_json::to_value(self.metrics.get_metrics_response(active))?)
    }
}

fn parse_agent_status(s: &str) -> Option<orchestrator_core::agent::AgentStatus> {
    use orchestrator_core::agent::AgentStatus::*;
    Some(match s {
        "pending" => Pending,
        "running" => Running,
        "paused" => Paused,
        "completed" => Completed,
        "failed" => Failed,
        "migrating" => Migrating,
        "terminated" => Terminated,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use orchestrator_core::config::OrchestratorConfig;
    use orchestrator_core::local_runtime::InProcessRuntime;

    async fn test_server() -> RpcServerImpl {
        let orchestrator = Arc::new(
            Orchestrator::new(OrchestratorConfig::default(), InProcessRuntime::new(8)).await.unwrap(),
        );
        let auth = Arc::new(AuthManager::new(AuthConfig { enabled: false, jwt_secret: "x".into() }));
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let events = Arc::new(EventPublisher::bind("127.0.0.1", 0).await.unwrap());
        RpcServerImpl::new(orchestrator, auth, metrics, events)
    }

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest { jsonrpc: "2.0".to_string(), method: method.to_string(), params: Some(params), id: Some(json!(1)), auth_token: None }
    }

    #[tokio::test]
    async fn unknown_method_yields_method_not_found() {
        let server = test_server().await;
        let resp = server.dispatch(request("agent.teleport", json!({}))).await;
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn role_register_then_list_round_trips() {
        let server = test_server().await;
        let resp = server
            .dispatch(request(
                "role.register",
                json!({ "id": "scout", "display_name": "Scout", "system_prompt": "find things" }),
            ))
            .await;
        assert!(resp.error.is_none());

        let list_resp = server.dispatch(request("role.list", Value::Null)).await;
        let roles = list_resp.result.unwrap();
        assert!(roles.as_array().unwrap().iter().any(|r| r["id"] == "scout"));
    }

    #[tokio::test]
    async fn health_check_reports_ok() {
        let server = test_server().await;
        let resp = server.dispatch(request("health.check", Value::Null)).await;
        assert_eq!(resp.result.unwrap()["status"], "ok");
    }

    #[tokio::test]
    async fn task_list_create_then_get() {
        let server = test_server().await;
        server
            .dispatch(request("task.list.create", json!({ "id": "sprint-1", "name": "Sprint 1" })))
            .await;
        let resp = server.dispatch(request("task.list.get", json!({ "list_id": "sprint-1" }))).await;
        assert!(resp.error.is_none());
        assert_eq!(resp.result.unwrap()["list"]["id"], "sprint-1");
    }
}
