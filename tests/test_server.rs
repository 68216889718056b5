//! Integration tests for the MCP server tools via duplex transport.
//!
//! Uses `tokio::io::duplex` to create an in-process transport, connects a test
//! client to the shellsup server, and exercises tools through the MCP protocol.

use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ClientHandler, ServiceExt};
use serde_json::Value;

use shellsup::dedup::Deduplicator;
use shellsup::executor::CommandResult;
use shellsup::interactive::InteractiveManager;
use shellsup::persistence::Persistence;
use shellsup::server::ShellSupServer;
use shellsup::store::SessionStore;
use shellsup::supervisor::Supervisor;

/// Minimal test client that implements ClientHandler with defaults.
#[derive(Default, Clone)]
struct TestClient;

impl ClientHandler for TestClient {}

/// Helper: start a server+client pair connected via duplex transport, backed
/// by a fresh temp-dir state root so tests never touch the real
/// `$HOME/.shellsup` or interfere with each other.
async fn setup() -> (
    rmcp::service::RunningService<rmcp::service::RoleClient, impl rmcp::service::Service<rmcp::service::RoleClient>>,
    tempfile::TempDir,
) {
    let state_dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(Persistence::new(state_dir.path().to_path_buf()));

    let store = Arc::new(SessionStore::new(Arc::clone(&persistence)));
    store.load_and_init().await;

    let supervisor = Arc::new(Supervisor::new(Arc::clone(&persistence)));
    supervisor.recover_orphans().await;

    let interactive = Arc::new(InteractiveManager::new());
    let dedup: Arc<Deduplicator<CommandResult>> = Arc::new(Deduplicator::with_defaults());

    let (server_transport, client_transport) = tokio::io::duplex(65536);

    let server = ShellSupServer::new(store, supervisor, interactive, dedup);
    tokio::spawn(async move {
        let service = server.serve(server_transport).await.unwrap();
        let _ = service.waiting().await;
    });

    let client = TestClient::default();
    let running = client.serve(client_transport).await.unwrap();
    (running, state_dir)
}

/// Helper: call a tool and parse the JSON text content from the response.
async fn call_tool(
    client: &rmcp::service::RunningService<
        rmcp::service::RoleClient,
        impl rmcp::service::Service<rmcp::service::RoleClient>,
    >,
    name: &str,
    args: Value,
) -> Value {
    let params = CallToolRequestParams {
        meta: None,
        name: name.to_string().into(),
        arguments: Some(serde_json::from_value(args).unwrap()),
        task: None,
    };
    let request = ClientRequest::CallToolRequest(Request::new(params));
    let response = client.send_request(request).await.unwrap();

    let ServerResult::CallToolResult(result) = response else {
        panic!("expected CallToolResult, got {response:?}");
    };

    let text = result
        .content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");

    serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text))
}

// ---------------------------------------------------------------------------
// run_command tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_run_command_echo() {
    let (client, _dir) = setup().await;
    let result = call_tool(
        &client,
        "run_command",
        serde_json::json!({"command": "echo", "args": ["hello_world"]}),
    )
    .await;

    assert_eq!(result["exit_code"], 0);
    assert!(result["success"].as_bool().unwrap());
    assert!(result["stdout"].as_str().unwrap().contains("hello_world"));

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_run_command_failure() {
    let (client, _dir) = setup().await;
    let result = call_tool(&client, "run_command", serde_json::json!({"command": "false"})).await;

    assert_eq!(result["exit_code"], 1);
    assert!(!result["success"].as_bool().unwrap());

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_run_command_with_timeout() {
    let (client, _dir) = setup().await;
    let result = call_tool(
        &client,
        "run_command",
        serde_json::json!({"command": "sleep", "args": ["30"], "timeout_seconds": 1}),
    )
    .await;

    assert!(result["timed_out"].as_bool().unwrap());

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_run_command_blocks_dangerous_command() {
    let (client, _dir) = setup().await;
    let result = call_tool(&client, "run_command", serde_json::json!({"command": "rm -rf /"})).await;

    // Dangerous commands surface as a structured error, not an execution.
    assert!(result.get("error").is_some(), "expected an error payload, got: {result}");

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// Shell session tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_and_list_sessions() {
    let (client, _dir) = setup().await;

    let created = call_tool(
        &client,
        "create_shell_session",
        serde_json::json!({"name": "build", "cwd": "/tmp"}),
    )
    .await;
    assert_eq!(created["name"], "build");
    assert_eq!(created["cwd"], "/tmp");

    let sessions = call_tool(&client, "list_shell_sessions", serde_json::json!({})).await;
    let names: Vec<&str> = sessions.as_array().unwrap().iter().filter_map(|s| s["name"].as_str()).collect();
    assert!(names.contains(&"default"));
    assert!(names.contains(&"build"));

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_cd_and_pwd_roundtrip() {
    let (client, _dir) = setup().await;

    call_tool(&client, "cd", serde_json::json!({"path": "/tmp"})).await;
    let pwd = call_tool(&client, "pwd", serde_json::json!({})).await;

    assert_eq!(pwd["cwd"], "/tmp");

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_history_records_run_command() {
    let (client, _dir) = setup().await;

    call_tool(&client, "run_command", serde_json::json!({"command": "echo", "args": ["tracked"]})).await;

    let history = call_tool(&client, "history", serde_json::json!({})).await;
    let entries = history.as_array().unwrap();
    assert!(!entries.is_empty());
    assert_eq!(entries[0]["command"], "echo");

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_close_session_refuses_default() {
    let (client, _dir) = setup().await;

    let result = call_tool(&client, "close_session", serde_json::json!({"session": "default"})).await;
    assert!(result.get("error").is_some());

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_close_session_kills_owned_background_processes() {
    let (client, _dir) = setup().await;

    call_tool(&client, "create_shell_session", serde_json::json!({"name": "doomed"})).await;

    let summary = call_tool(
        &client,
        "run_background",
        serde_json::json!({"session": "doomed", "command": "sleep", "args": ["30"]}),
    )
    .await;
    let process_id = summary["id"].as_str().unwrap().to_string();

    let closed = call_tool(&client, "close_session", serde_json::json!({"session": "doomed"})).await;
    assert_eq!(closed["closed"], true);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let listed = call_tool(&client, "list_processes", serde_json::json!({})).await;
    let processes = listed["processes"].as_array().unwrap();
    let entry = processes.iter().find(|p| p["id"] == process_id);
    let status = entry.map(|p| p["status"].as_str().unwrap_or("").to_string());
    assert!(
        entry.is_none() || status.as_deref() == Some("KILLED"),
        "expected background process to be killed after closing its session, got: {listed}"
    );

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// Background process tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_run_background_and_list() {
    let (client, _dir) = setup().await;

    let summary = call_tool(
        &client,
        "run_background",
        serde_json::json!({"command": "sleep", "args": ["5"], "name": "sleeper"}),
    )
    .await;
    assert_eq!(summary["name"], "sleeper");
    assert!(summary["id"].is_string());

    let listed = call_tool(&client, "list_processes", serde_json::json!({})).await;
    let processes = listed["processes"].as_array().unwrap();
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0]["name"], "sleeper");

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_run_background_output_and_kill() {
    let (client, _dir) = setup().await;

    let summary = call_tool(
        &client,
        "run_background",
        serde_json::json!({"command": "sh", "args": ["-c", "for i in 1 2 3; do echo line$i; sleep 1; done"]}),
    )
    .await;
    let id = summary["id"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let output = call_tool(&client, "get_process_output", serde_json::json!({"process_id": id})).await;
    let lines = output.as_array().unwrap();
    assert!(!lines.is_empty());

    let killed = call_tool(&client, "kill_process", serde_json::json!({"process_id": id})).await;
    assert_eq!(killed["id"], id);

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// Batch tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_batch_execute_sequential() {
    let (client, _dir) = setup().await;

    let report = call_tool(
        &client,
        "batch_execute",
        serde_json::json!({
            "commands": [
                {"command": "echo", "args": ["one"]},
                {"command": "echo", "args": ["two"]},
            ]
        }),
    )
    .await;

    assert_eq!(report["total_commands"], 2);
    assert_eq!(report["executed_count"], 2);
    assert_eq!(report["success_count"], 2);

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_batch_execute_stops_on_first_failure() {
    let (client, _dir) = setup().await;

    let report = call_tool(
        &client,
        "batch_execute",
        serde_json::json!({
            "stop_on_first_failure": true,
            "commands": [
                {"command": "false"},
                {"command": "echo", "args": ["never runs"]},
            ]
        }),
    )
    .await;

    assert_eq!(report["executed_count"], 1);
    assert_eq!(report["skipped_count"], 1);

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// Interactive PTY tests (local backend only -- no network in tests)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_interactive_local_session_lifecycle() {
    let (client, _dir) = setup().await;

    let started = call_tool(&client, "ssh_interactive_start", serde_json::json!({})).await;
    let id = started["id"].as_str().unwrap().to_string();
    assert_eq!(started["status"], "connected");

    call_tool(
        &client,
        "ssh_interactive_send",
        serde_json::json!({"id": id, "text": "echo pty_hello"}),
    )
    .await;

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let output = call_tool(&client, "ssh_interactive_output", serde_json::json!({"id": id})).await;
    let lines = output.as_array().unwrap();
    assert!(
        lines.iter().any(|l| l["content"].as_str().unwrap_or("").contains("pty_hello")),
        "expected pty_hello in output, got: {output}"
    );

    let closed = call_tool(&client, "ssh_interactive_close", serde_json::json!({"id": id})).await;
    assert_eq!(closed["closed"], true);

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_interactive_list_never_includes_credentials() {
    let (client, _dir) = setup().await;

    call_tool(&client, "ssh_interactive_start", serde_json::json!({})).await;
    let listed = call_tool(&client, "ssh_interactive_list", serde_json::json!({})).await;

    let text = listed.to_string();
    assert!(!text.contains("password"));

    client.cancel().await.unwrap();
}
