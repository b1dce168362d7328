//! Integration tests for the JSON-RPC server: one Unix socket round trip
//! per call, covering cluster registration, agent spawn/exec/kill, role
//! assignment, messaging, and the task store.
//!
//! Grounded on the teacher's `rpc_server_tests.rs` harness shape (spin up a
//! real `UnixSocketRpcServer` against a temp socket, send newline-terminated
//! JSON-RPC requests, assert on the decoded response) adapted to this
//! control plane's method surface.

use orchestrator_core::local_runtime::InProcessRuntime;
use orchestrator_core::Orchestrator;
use orchestrator_daemon::config::{AuthConfig, DaemonConfig};
use orchestrator_daemon::{AuthManager, EventPublisher, MetricsCollector, ServerHandle, UnixSocketRpcServer};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

async fn setup_test_server() -> (ServerHandle, PathBuf, Arc<Orchestrator>, TempDir) {
    let temp_dir = tempdir().unwrap();
    let socket_path = temp_dir.path().join("test-rpc.sock");

    let mut config = DaemonConfig::default();
    config.rpc.socket_path = socket_path.clone();
    config.orchestrator.task_store.base_path = temp_dir.path().join("tasks");

    let orchestrator = Arc::new(
        Orchestrator::new(config.orchestrator.clone(), InProcessRuntime::new(16)).await.unwrap(),
    );
    let auth = Arc::new(AuthManager::new(AuthConfig { enabled: false, jwt_secret: "x".into() }));
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let events = Arc::new(EventPublisher::bind("127.0.0.1", 0).await.unwrap());

    let server = UnixSocketRpcServer::new(&config, orchestrator.clone(), auth, metrics, events);
    let handle = server.start(orchestrator.clone()).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    (handle, socket_path, orchestrator, temp_dir)
}

fn request(method: &str, params: Value, id: u64) -> String {
    json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": id }).to_string()
}

async fn call(socket_path: &PathBuf, req: &str) -> Value {
    let mut stream = UnixStream::connect(socket_path).await.unwrap();
    stream.write_all(req.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn health_check_round_trips() {
    let (_handle, socket_path, _orch, _dir) = setup_test_server().await;
    let resp = call(&socket_path, &request("health.check", Value::Null, 1)).await;
    assert_eq!(resp["result"]["status"], "ok");
}

#[tokio::test]
async fn unknown_method_returns_jsonrpc_error() {
    let (_handle, socket_path, _orch, _dir) = setup_test_server().await;
    let resp = call(&socket_path, &request("agent.teleport", json!({}), 1)).await;
    assert_eq!(resp["error"]["code"], -32601);
}

#[tokio::test]
async fn agent_spawn_exec_kill_lifecycle() {
    let (_handle, socket_path, _orch, _dir) = setup_test_server().await;

    let spawn_resp = call(
        &socket_path,
        &request("agent.spawn", json!({ "model": "gpt-4", "prefer_local": true }), 1),
    )
    .await;
    assert!(spawn_resp["error"].is_null(), "spawn failed: {spawn_resp:?}");
    let agent_id = spawn_resp["result"]["id"].as_str().unwrap().to_string();

    let exec_resp = call(
        &socket_path,
        &request("agent.exec", json!({ "agent_id": agent_id, "command": "echo hi" }), 2),
    )
    .await;
    assert!(exec_resp["error"].is_null());
    assert_eq!(exec_resp["result"]["exit_code"], 0);

    let list_resp = call(&socket_path, &request("agent.list", json!({}), 3)).await;
    assert_eq!(list_resp["result"].as_array().unwrap().len(), 1);

    let kill_resp = call(
        &socket_path,
        &request("agent.kill", json!({ "agent_id": agent_id, "force": false }), 4),
    )
    .await;
    assert!(kill_resp["error"].is_null());
}

#[tokio::test]
async fn role_register_assign_and_message_flow() {
    let (_handle, socket_path, _orch, _dir) = setup_test_server().await;

    let register = call(
        &socket_path,
        &request(
            "role.register",
            json!({ "id": "scout", "display_name": "Scout", "system_prompt": "investigate things" }),
            1,
        ),
    )
    .await;
    assert!(register["error"].is_null());

    let spawn = call(&socket_path, &request("agent.spawn", json!({ "model": "gpt-4" }), 2)).await;
    let agent_id = spawn["result"]["id"].as_str().unwrap().to_string();

    let assign = call(
        &socket_path,
        &request("role.assign", json!({ "agent_id": agent_id, "role_id": "scout" }), 3),
    )
    .await;
    assert!(assign["error"].is_null(), "assign failed: {assign:?}");

    let send = call(
        &socket_path,
        &request(
            "message.send",
            json!({ "from": "coordinator", "to": agent_id, "content": "begin scouting" }),
            4,
        ),
    )
    .await;
    assert!(send["error"].is_null());

    let mailbox = call(&socket_path, &request("message.mailbox", json!({ "agent_id": agent_id }), 5)).await;
    let messages = mailbox["result"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "begin scouting");
}

#[tokio::test]
async fn compose_team_scales_with_complexity() {
    let (_handle, socket_path, _orch, _dir) = setup_test_server().await;
    let resp = call(
        &socket_path,
        &request(
            "role.composeTeam",
            json!({ "task": "rewrite the billing service", "complexity": "high", "estimated_subtasks": 8 }),
            1,
        ),
    )
    .await;
    assert!(resp["result"]["workerCount"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn task_store_create_complete_and_dependency() {
    let (_handle, socket_path, _orch, _dir) = setup_test_server().await;

    let list = call(
        &socket_path,
        &request("task.list.create", json!({ "id": "sprint-1", "name": "Sprint 1" }), 1),
    )
    .await;
    assert!(list["error"].is_null());

    call(
        &socket_path,
        &request(
            "task.create",
            json!({ "list_id": "sprint-1", "id": "t1", "title": "Design schema" }),
            2,
        ),
    )
    .await;
    call(
        &socket_path,
        &request(
            "task.create",
            json!({ "list_id": "sprint-1", "id": "t2", "title": "Implement migration" }),
            3,
        ),
    )
    .await;

    let dep = call(
        &socket_path,
        &request("task.addDependency", json!({ "task_id": "t2", "depends_on_id": "t1" }), 4),
    )
    .await;
    assert!(dep["error"].is_null());

    let complete = call(&socket_path, &request("task.complete", json!({ "task_id": "t1" }), 5)).await;
    assert!(complete["error"].is_null());

    let fetched = call(&socket_path, &request("task.list.get", json!({ "list_id": "sprint-1" }), 6)).await;
    let tasks = fetched["result"]["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
}

#[tokio::test]
async fn task_decompose_returns_parallel_levels() {
    let (_handle, socket_path, _orch, _dir) = setup_test_server().await;
    let resp = call(
        &socket_path,
        &request(
            "task.decompose",
            json!({ "task": "migrate the auth service", "strategy": "component-based" }),
            1,
        ),
    )
    .await;
    assert!(resp["error"].is_null());
    assert!(!resp["result"]["subtasks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn metrics_get_reflects_agent_spawns() {
    let (_handle, socket_path, _orch, _dir) = setup_test_server().await;
    call(&socket_path, &request("agent.spawn", json!({ "model": "gpt-4" }), 1)).await;
    let resp = call(&socket_path, &request("metrics.get", Value::Null, 2)).await;
    assert_eq!(resp["result"]["agents_running"], 1);
}
