//! Integration tests for cluster registration, selection, and agent
//! migration across clusters, driven entirely over the Unix-socket RPC
//! surface with `MockClusterClient` backends (no live ZMQ endpoints).

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

async fn setup_test_server() -> (ServerHandle, PathBuf, TempDir) {
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
    (handle, socket_path, temp_dir)
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

fn register_params(id: &str, max_agents: u32) -> Value {
    json!({
        "id": id,
        "name": format!("{id}-cluster"),
        "endpoint": format!("tcp://{id}.internal:5555"),
        "region": "us-east",
        "max_agents": max_agents,
        "connect": false,
    })
}

#[tokio::test]
async fn register_then_list_reports_active_cluster() {
    let (_handle, socket_path, _dir) = setup_test_server().await;

    let register = call(&socket_path, &request("cluster.register", register_params("east-1", 10), 1)).await;
    assert!(register["error"].is_null(), "register failed: {register:?}");

    let list = call(&socket_path, &request("cluster.list", json!({}), 2)).await;
    let clusters = list["result"].as_array().unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0]["id"], "east-1");
}

#[tokio::test]
async fn select_honors_gpu_and_capacity_criteria() {
    let (_handle, socket_path, _dir) = setup_test_server().await;

    call(&socket_path, &request("cluster.register", register_params("small", 2), 1)).await;
    call(&socket_path, &request("cluster.register", register_params("big", 50), 2)).await;

    let resp = call(
        &socket_path,
        &request("cluster.select", json!({ "min_agents": 20 }), 3),
    )
    .await;
    assert_eq!(resp["result"]["id"], "big");
}

#[tokio::test]
async fn unregister_removes_cluster_from_selection() {
    let (_handle, socket_path, _dir) = setup_test_server().await;

    call(&socket_path, &request("cluster.register", register_params("west-1", 10), 1)).await;
    let unregister = call(
        &socket_path,
        &request("cluster.unregister", json!({ "cluster_id": "west-1" }), 2),
    )
    .await;
    assert!(unregister["error"].is_null());

    let list = call(&socket_path, &request("cluster.list", json!({}), 3)).await;
    assert!(list["result"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn agent_migrates_between_registered_clusters() {
    let (_handle, socket_path, _dir) = setup_test_server().await;

    call(&socket_path, &request("cluster.register", register_params("origin", 10), 1)).await;
    call(&socket_path, &request("cluster.register", register_params("destination", 10), 2)).await;

    let spawn = call(&socket_path, &request("agent.spawn", json!({ "model": "gpt-4" }), 3)).await;
    assert!(spawn["error"].is_null(), "spawn failed: {spawn:?}");
    let agent_id = spawn["result"]["id"].as_str().unwrap().to_string();

    let migrate = call(
        &socket_path,
        &request("agent.migrate", json!({ "agent_id": agent_id, "to_cluster": "destination" }), 4),
    )
    .await;
    assert!(migrate["error"].is_null(), "migrate failed: {migrate:?}");
}

#[tokio::test]
async fn migrate_to_unknown_cluster_fails() {
    let (_handle, socket_path, _dir) = setup_test_server().await;

    let spawn = call(&socket_path, &request("agent.spawn", json!({ "model": "gpt-4" }), 1)).await;
    let agent_id = spawn["result"]["id"].as_str().unwrap().to_string();

    let migrate = call(
        &socket_path,
        &request("agent.migrate", json!({ "agent_id": agent_id, "to_cluster": "nowhere" }), 2),
    )
    .await;
    assert!(!migrate["error"].is_null());
}
