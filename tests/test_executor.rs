//! Unit tests for the command executor (C6): deterministic truncation,
//! timeout/kill semantics, dangerous-command blocking, and history recording.

use std::sync::Arc;
use std::time::Duration;

use shellsup::executor::{self, ExecuteRequest};
use shellsup::persistence::Persistence;
use shellsup::store::SessionStore;

async fn store() -> Arc<SessionStore> {
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(Persistence::new(dir.path().to_path_buf()));
    let store = Arc::new(SessionStore::new(persistence));
    store.load_and_init().await;
    std::mem::forget(dir);
    store
}

fn request(command: &str, args: &[&str]) -> ExecuteRequest {
    ExecuteRequest {
        session_id_or_name: "default".to_string(),
        command: command.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        cwd: None,
        env: None,
        timeout: None,
        max_stdout_lines: 200,
        max_stderr_lines: 200,
    }
}

#[tokio::test]
async fn test_execute_echo_succeeds() {
    let store = store().await;
    let result = executor::execute(&store, request("echo", &["hi"])).await.unwrap();

    assert!(result.success);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout.trim(), "hi");
    assert!(!result.timed_out);
}

#[tokio::test]
async fn test_execute_nonzero_exit_is_not_success() {
    let store = store().await;
    let result = executor::execute(&store, request("false", &[])).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, 1);
}

#[tokio::test]
async fn test_execute_blocks_empty_command() {
    let store = store().await;
    let err = executor::execute(&store, request("   ", &[])).await.unwrap_err();
    assert!(matches!(err, shellsup::error::Error::Invalid(_)));
}

#[tokio::test]
async fn test_execute_blocks_dangerous_command() {
    let store = store().await;
    let req = request("rm", &["-rf", "/"]);
    let err = executor::execute(&store, req).await.unwrap_err();
    assert!(matches!(err, shellsup::error::Error::Invalid(_)));
}

#[tokio::test]
async fn test_execute_timeout_kills_child_and_marks_timed_out() {
    let store = store().await;
    let mut req = request("sleep", &["30"]);
    req.timeout = Some(Duration::from_millis(200));

    let result = executor::execute(&store, req).await.unwrap();
    assert!(result.timed_out);
    assert_eq!(result.error.as_deref(), Some("ETIMEDOUT"));
    assert!(!result.success);
}

#[tokio::test]
async fn test_execute_no_truncation_under_max_lines() {
    let store = store().await;
    let req = request("sh", &["-c", "for i in 1 2 3; do echo line$i; done"]);
    let result = executor::execute(&store, req).await.unwrap();

    let trunc = result.truncation.stdout.as_ref().unwrap();
    assert!(!trunc.truncated);
    assert_eq!(trunc.total_lines, 3);
    assert_eq!(trunc.returned_lines, 3);
}

#[tokio::test]
async fn test_execute_truncates_with_head_tail_marker() {
    let store = store().await;
    let mut req = request("sh", &["-c", "for i in $(seq 1 100); do echo line$i; done"]);
    req.max_stdout_lines = 20;

    let result = executor::execute(&store, req).await.unwrap();
    let trunc = result.truncation.stdout.as_ref().unwrap();

    assert!(trunc.truncated);
    assert_eq!(trunc.total_lines, 100);
    // 60% head + 40% tail of 20 = 12 head, 8 tail.
    assert!(result.stdout.starts_with("line1\n"));
    assert!(result.stdout.contains("lines omitted"));
    assert!(result.stdout.trim_end().ends_with("line100"));
}

#[tokio::test]
async fn test_execute_records_history_entry() {
    let store = store().await;
    executor::execute(&store, request("echo", &["tracked"])).await.unwrap();

    let history = store.history("default", None).await.unwrap();
    assert!(history.iter().any(|h| h.command == "echo" && h.args == vec!["tracked".to_string()]));
}

#[tokio::test]
async fn test_execute_uses_session_cwd_by_default() {
    let store = store().await;
    store.create("work".to_string(), Some("/tmp".to_string()), None).await.unwrap();

    let mut req = request("pwd", &[]);
    req.session_id_or_name = "work".to_string();
    let result = executor::execute(&store, req).await.unwrap();

    assert!(result.stdout.trim().ends_with("/tmp"));
}
