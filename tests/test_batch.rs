//! Unit tests for the batch planner (C7): sequential/parallel execution,
//! stop-on-failure, retries, and condition evaluation.

use std::sync::Arc;
use std::time::Duration;

use shellsup::batch::{self, BatchCommand, BatchRequest, Condition, ConditionOperator, ConditionSource, RetryPolicy};
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

fn cmd(command: &str, args: &[&str]) -> BatchCommand {
    BatchCommand {
        command: command.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        cwd: None,
        env: None,
        continue_on_error: false,
        condition: None,
        retry: None,
    }
}

fn request(commands: Vec<BatchCommand>) -> BatchRequest {
    BatchRequest {
        session_id_or_name: "default".to_string(),
        commands,
        parallel: false,
        max_parallel: 4,
        stop_on_first_failure: false,
        max_stdout_lines: 200,
        max_stderr_lines: 200,
    }
}

#[tokio::test]
async fn test_sequential_batch_runs_all_commands() {
    let store = store().await;
    let report = batch::run_batch(store, request(vec![cmd("echo", &["one"]), cmd("echo", &["two"])]))
        .await
        .unwrap();

    assert_eq!(report.total_commands, 2);
    assert_eq!(report.executed_count, 2);
    assert_eq!(report.success_count, 2);
    assert_eq!(report.skipped_count, 0);
}

#[tokio::test]
async fn test_stop_on_first_failure_skips_remaining() {
    let store = store().await;
    let mut req = request(vec![cmd("false", &[]), cmd("echo", &["never"])]);
    req.stop_on_first_failure = true;

    let report = batch::run_batch(store, req).await.unwrap();

    assert_eq!(report.executed_count, 1);
    assert_eq!(report.skipped_count, 0);
    assert!(!report.results[0].success);
}

#[tokio::test]
async fn test_continue_on_error_runs_remaining_after_failure() {
    let store = store().await;
    let mut first = cmd("false", &[]);
    first.continue_on_error = true;
    let report = batch::run_batch(store, request(vec![first, cmd("echo", &["still ran"])]))
        .await
        .unwrap();

    assert_eq!(report.executed_count, 2);
    assert_eq!(report.failure_count, 1);
    assert_eq!(report.success_count, 1);
}

#[tokio::test]
async fn test_default_stop_behavior_halts_without_continue_or_retry() {
    let store = store().await;
    let report = batch::run_batch(store, request(vec![cmd("false", &[]), cmd("echo", &["never"])]))
        .await
        .unwrap();

    // Neither `continue_on_error` nor a retry policy is set, so the plan
    // stops after the first failure even without `stop_on_first_failure`.
    assert_eq!(report.executed_count, 1);
}

#[tokio::test]
async fn test_retry_policy_retries_failing_command() {
    let store = store().await;
    let mut flaky = cmd("false", &[]);
    flaky.retry = Some(RetryPolicy { retry_count: 2, retry_delay: Duration::from_millis(1) });

    let report = batch::run_batch(store, request(vec![flaky])).await.unwrap();

    assert_eq!(report.results[0].retries, 2);
    assert!(!report.results[0].success);
}

#[tokio::test]
async fn test_condition_skips_command_when_previous_failed() {
    let store = store().await;
    let mut gated = cmd("echo", &["should not run"]);
    gated.condition = Some(Condition {
        source: ConditionSource::Success,
        operator: ConditionOperator::Equals,
        value: serde_json::json!(true),
        target_index: None,
    });

    let report = batch::run_batch(store, request(vec![cmd("false", &[]), gated])).await.unwrap();

    assert_eq!(report.skipped_count, 1);
    assert!(report.results[1].skipped);
}

#[tokio::test]
async fn test_condition_runs_command_when_previous_succeeded() {
    let store = store().await;
    let mut gated = cmd("echo", &["runs"]);
    gated.condition = Some(Condition {
        source: ConditionSource::Success,
        operator: ConditionOperator::Equals,
        value: serde_json::json!(true),
        target_index: None,
    });

    let report = batch::run_batch(store, request(vec![cmd("true", &[]), gated])).await.unwrap();

    assert_eq!(report.skipped_count, 0);
    assert_eq!(report.executed_count, 2);
}

#[tokio::test]
async fn test_condition_on_stdout_contains() {
    let store = store().await;
    let mut gated = cmd("echo", &["gated ran"]);
    gated.condition = Some(Condition {
        source: ConditionSource::Stdout,
        operator: ConditionOperator::Contains,
        value: serde_json::json!("hello"),
        target_index: None,
    });

    let report = batch::run_batch(store, request(vec![cmd("echo", &["hello world"]), gated]))
        .await
        .unwrap();

    assert!(!report.results[1].skipped);
}

#[tokio::test]
async fn test_parallel_batch_runs_independent_commands() {
    let store = store().await;
    let mut req = request(vec![cmd("echo", &["a"]), cmd("echo", &["b"]), cmd("echo", &["c"])]);
    req.parallel = true;
    req.max_parallel = 2;

    let report = batch::run_batch(store, req).await.unwrap();

    assert!(report.parallel);
    assert_eq!(report.total_commands, 3);
    assert_eq!(report.success_count, 3);
}

#[tokio::test]
async fn test_parallel_batch_rejects_zero_max_parallel() {
    let store = store().await;
    let mut req = request(vec![cmd("echo", &["a"])]);
    req.parallel = true;
    req.max_parallel = 0;

    let err = batch::run_batch(store, req).await.unwrap_err();
    assert!(matches!(err, shellsup::error::Error::ResourceExceeded(_)));
}

#[tokio::test]
async fn test_parallel_batch_skips_conditions_unconditionally() {
    let store = store().await;
    let mut gated = cmd("echo", &["never"]);
    gated.condition = Some(Condition {
        source: ConditionSource::Success,
        operator: ConditionOperator::Equals,
        value: serde_json::json!(true),
        target_index: None,
    });
    let mut req = request(vec![cmd("echo", &["a"]), gated]);
    req.parallel = true;

    let report = batch::run_batch(store, req).await.unwrap();
    assert_eq!(report.skipped_count, 1);
}
