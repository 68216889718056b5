//! Unit tests for the session store (C4) and its interaction with the
//! command executor (C6): a session's cwd/env persist across `run_command`
//! calls, and each call is recorded into that session's history.

use std::sync::Arc;

use shellsup::executor::{self, ExecuteRequest};
use shellsup::persistence::Persistence;
use shellsup::session::{control_char, process_escapes};
use shellsup::store::{SessionPatch, SessionStore, DEFAULT_SESSION_NAME};

async fn store() -> Arc<SessionStore> {
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(Persistence::new(dir.path().to_path_buf()));
    let store = Arc::new(SessionStore::new(persistence));
    store.load_and_init().await;
    // Keep the tempdir alive for the store's lifetime by leaking it; tests
    // run in their own process and the OS reclaims it on exit.
    std::mem::forget(dir);
    store
}

fn request(session: &str, command: &str, args: &[&str]) -> ExecuteRequest {
    ExecuteRequest {
        session_id_or_name: session.to_string(),
        command: command.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        cwd: None,
        env: None,
        timeout: None,
        max_stdout_lines: 200,
        max_stderr_lines: 200,
    }
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_default_session_exists_after_init() {
    let store = store().await;
    let session = store.get(DEFAULT_SESSION_NAME).await.unwrap();
    assert_eq!(session.name, DEFAULT_SESSION_NAME);
}

#[tokio::test]
async fn test_create_session_with_explicit_cwd() {
    let store = store().await;
    let session = store.create("work".to_string(), Some("/tmp".to_string()), None).await.unwrap();
    assert_eq!(session.cwd, "/tmp");
}

#[tokio::test]
async fn test_create_duplicate_name_conflicts() {
    let store = store().await;
    store.create("work".to_string(), None, None).await.unwrap();
    let err = store.create("work".to_string(), None, None).await.unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn test_delete_default_session_refused() {
    let store = store().await;
    let err = store.delete(DEFAULT_SESSION_NAME).await.unwrap_err();
    assert!(err.to_string().contains("default"));
}

#[tokio::test]
async fn test_delete_named_session() {
    let store = store().await;
    let session = store.create("scratch".to_string(), None, None).await.unwrap();
    store.delete("scratch").await.unwrap();
    assert!(store.get(&session.id.to_string()).await.is_err());
}

#[tokio::test]
async fn test_resolve_by_id_and_by_name() {
    let store = store().await;
    let session = store.create("named".to_string(), None, None).await.unwrap();
    let by_name = store.get("named").await.unwrap();
    let by_id = store.get(&session.id.to_string()).await.unwrap();
    assert_eq!(by_name.id, by_id.id);
}

// ---------------------------------------------------------------------------
// cwd/env persistence across executor calls
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cd_persists_across_run_command_calls() {
    let store = store().await;
    store.create("shell".to_string(), Some("/tmp".to_string()), None).await.unwrap();

    let result = executor::execute(&store, request("shell", "pwd", &[])).await.unwrap();
    assert!(result.stdout.trim().ends_with("/tmp"));

    store
        .update("shell", SessionPatch { cwd: Some("/".to_string()), env: None })
        .await
        .unwrap();

    let result = executor::execute(&store, request("shell", "pwd", &[])).await.unwrap();
    assert_eq!(result.stdout.trim(), "/");
}

#[tokio::test]
async fn test_explicit_request_cwd_overrides_session_cwd() {
    let store = store().await;
    store.create("shell".to_string(), Some("/tmp".to_string()), None).await.unwrap();

    let mut req = request("shell", "pwd", &[]);
    req.cwd = Some("/".to_string());
    let result = executor::execute(&store, req).await.unwrap();
    assert_eq!(result.stdout.trim(), "/");

    // The session's own cwd is unaffected by a one-off override.
    let session = store.get("shell").await.unwrap();
    assert_eq!(session.cwd, "/tmp");
}

#[tokio::test]
async fn test_env_persists_across_run_command_calls() {
    let store = store().await;
    store
        .create(
            "envtest".to_string(),
            None,
            Some(vec![("SESSION_MARKER".to_string(), "abc123".to_string())]),
        )
        .await
        .unwrap();

    let result = executor::execute(&store, request("envtest", "sh", &["-c", "echo $SESSION_MARKER"]))
        .await
        .unwrap();
    assert!(result.stdout.contains("abc123"));
}

#[tokio::test]
async fn test_run_command_records_history() {
    let store = store().await;
    store.create("histtest".to_string(), None, None).await.unwrap();

    executor::execute(&store, request("histtest", "echo", &["recorded"])).await.unwrap();

    let history = store.history("histtest", None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].command, "echo");
    assert_eq!(history[0].args, vec!["recorded".to_string()]);
    assert_eq!(history[0].exit_code, Some(0));
}

#[tokio::test]
async fn test_history_limit_returns_most_recent() {
    let store = store().await;
    store.create("histtest".to_string(), None, None).await.unwrap();

    for i in 0..5 {
        executor::execute(&store, request("histtest", "echo", &[&i.to_string()])).await.unwrap();
    }

    let history = store.history("histtest", Some(2)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].args, vec!["4".to_string()]);
}

#[tokio::test]
async fn test_search_history_matches_command_text() {
    let store = store().await;
    store.create("histtest".to_string(), None, None).await.unwrap();

    executor::execute(&store, request("histtest", "echo", &["needle"])).await.unwrap();
    executor::execute(&store, request("histtest", "echo", &["hay"])).await.unwrap();

    let matches = store.search_history("histtest", "needle").await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].args, vec!["needle".to_string()]);
}

// ---------------------------------------------------------------------------
// Local PTY primitives (pure helper functions; full PTY spawn/I/O is
// exercised through interactive.rs's own integration tests)
// ---------------------------------------------------------------------------

#[test]
fn test_process_escapes_newline_and_tab() {
    assert_eq!(process_escapes("a\\nb\\t"), b"a\nb\t");
}

#[test]
fn test_process_escapes_hex_byte() {
    assert_eq!(process_escapes("\\x41"), vec![0x41]);
}

#[test]
fn test_process_escapes_literal_backslash() {
    assert_eq!(process_escapes("a\\\\b"), b"a\\b");
}

#[test]
fn test_control_char_ctrl_c() {
    assert_eq!(control_char("C"), Some(0x03));
}

#[test]
fn test_control_char_rejects_multi_letter() {
    assert_eq!(control_char("CC"), None);
}
