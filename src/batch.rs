//! Batch planner (C7): sequential or bounded-parallel execution of a plan of
//! commands with per-command conditions, retries, and fail-stop policy.
//!
//! Teacher has no batch concept; the bounded worker pool uses
//! `tokio::sync::Semaphore`, matching how `supervisor.rs`'s sampler and
//! `dedup.rs`'s sweep are each kept from running unbounded concurrent work.

use crate::executor::{self, CommandResult, ExecuteRequest};
use crate::store::SessionStore;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionSource {
    ExitCode,
    Stdout,
    Stderr,
    Success,
    PreviousCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    Matches,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub source: ConditionSource,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
    pub target_index: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct BatchCommand {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: Option<Vec<(String, String)>>,
    pub continue_on_error: bool,
    pub condition: Option<Condition>,
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchCommandResult {
    pub id: Uuid,
    pub command: String,
    pub args: Vec<String>,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub retries: u32,
    pub truncation: executor::Truncation,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub results: Vec<BatchCommandResult>,
    pub total_commands: usize,
    pub executed_count: usize,
    pub skipped_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_duration_ms: u64,
    pub parallel: bool,
}

pub struct BatchRequest {
    pub session_id_or_name: String,
    pub commands: Vec<BatchCommand>,
    pub parallel: bool,
    pub max_parallel: usize,
    pub stop_on_first_failure: bool,
    pub max_stdout_lines: usize,
    pub max_stderr_lines: usize,
}

/// Run a plan of commands sequentially or with bounded parallelism. Takes
/// `store` by `Arc` since the parallel path spawns workers that must own
/// their handle to it.
pub async fn run_batch(store: Arc<SessionStore>, request: BatchRequest) -> crate::error::Result<BatchReport> {
    if request.parallel && request.max_parallel == 0 {
        return Err(crate::error::Error::ResourceExceeded(
            "maxParallel must be at least 1 in parallel mode".to_string(),
        ));
    }

    let started = Instant::now();
    let batch_id = Uuid::new_v4();

    let results = if request.parallel {
        run_parallel(Arc::clone(&store), &request).await?
    } else {
        run_sequential(&store, &request).await?
    };

    let executed_count = results.iter().filter(|r| !r.skipped).count();
    let skipped_count = results.iter().filter(|r| r.skipped).count();
    let success_count = results.iter().filter(|r| r.success).count();
    let failure_count = results.iter().filter(|r| !r.success && !r.skipped).count();

    Ok(BatchReport {
        batch_id,
        total_commands: request.commands.len(),
        executed_count,
        skipped_count,
        success_count,
        failure_count,
        total_duration_ms: started.elapsed().as_millis() as u64,
        parallel: request.parallel,
        results,
    })
}

async fn run_sequential(
    store: &SessionStore,
    request: &BatchRequest,
) -> crate::error::Result<Vec<BatchCommandResult>> {
    let mut results: Vec<BatchCommandResult> = Vec::with_capacity(request.commands.len());

    for cmd in &request.commands {
        if let Some(condition) = &cmd.condition {
            if !evaluate_condition(condition, &results) {
                results.push(skipped_result(cmd, "condition not satisfied".to_string()));
                continue;
            }
        }

        let (result, retries) = run_with_retries(store, request, cmd).await;
        let failed = !result.success;
        results.push(to_batch_result(cmd, result, false, None, retries));

        if failed {
            let no_retry_policy = cmd.retry.as_ref().map_or(true, |r| r.retry_count == 0);
            if request.stop_on_first_failure || (!cmd.continue_on_error && no_retry_policy) {
                break;
            }
        }
    }

    Ok(results)
}

async fn run_parallel(
    store: Arc<SessionStore>,
    request: &BatchRequest,
) -> crate::error::Result<Vec<BatchCommandResult>> {
    let n = request.commands.len();
    let mut slots: Vec<Option<BatchCommandResult>> = vec![None; n];

    for (idx, cmd) in request.commands.iter().enumerate() {
        if cmd.condition.is_some() {
            slots[idx] = Some(skipped_result(cmd, "Conditions not supported in parallel mode".to_string()));
        }
    }

    let semaphore = Arc::new(Semaphore::new(request.max_parallel));
    let mut handles = Vec::new();
    let stop_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

    for (idx, cmd) in request.commands.iter().enumerate() {
        if slots[idx].is_some() {
            continue;
        }
        if request.stop_on_first_failure && stop_flag.load(std::sync::atomic::Ordering::Relaxed) {
            slots[idx] = Some(skipped_result(cmd, "batch stopped after first failure".to_string()));
            continue;
        }

        let semaphore = Arc::clone(&semaphore);
        let stop_flag = Arc::clone(&stop_flag);
        let store = Arc::clone(&store);
        let cmd = cmd.clone();
        let session_id_or_name = request.session_id_or_name.clone();
        let max_stdout_lines = request.max_stdout_lines;
        let max_stderr_lines = request.max_stderr_lines;
        let stop_on_first_failure = request.stop_on_first_failure;

        handles.push((
            idx,
            tokio::spawn(run_one_bounded(
                store,
                semaphore,
                stop_flag,
                stop_on_first_failure,
                session_id_or_name,
                cmd,
                max_stdout_lines,
                max_stderr_lines,
            )),
        ));
    }

    for (idx, handle) in handles {
        if let Ok(result) = handle.await {
            slots[idx] = Some(result);
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

#[allow(clippy::too_many_arguments)]
async fn run_one_bounded(
    store: Arc<SessionStore>,
    semaphore: Arc<Semaphore>,
    stop_flag: Arc<std::sync::atomic::AtomicBool>,
    stop_on_first_failure: bool,
    session_id_or_name: String,
    cmd: BatchCommand,
    max_stdout_lines: usize,
    max_stderr_lines: usize,
) -> BatchCommandResult {
    let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");

    let (result, retries) = run_with_retries_owned(
        &store,
        &session_id_or_name,
        &cmd,
        max_stdout_lines,
        max_stderr_lines,
    )
    .await;

    if !result.success && stop_on_first_failure {
        stop_flag.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    to_batch_result(&cmd, result, false, None, retries)
}

async fn run_with_retries(
    store: &SessionStore,
    request: &BatchRequest,
    cmd: &BatchCommand,
) -> (CommandResult, u32) {
    run_with_retries_owned(
        &store,
        &request.session_id_or_name,
        cmd,
        request.max_stdout_lines,
        request.max_stderr_lines,
    )
    .await
}

async fn run_with_retries_owned(
    store: &SessionStore,
    session_id_or_name: &str,
    cmd: &BatchCommand,
    max_stdout_lines: usize,
    max_stderr_lines: usize,
) -> (CommandResult, u32) {
    let max_attempts = 1 + cmd.retry.as_ref().map_or(0, |r| r.retry_count);
    let delay = cmd.retry.as_ref().map_or(Duration::ZERO, |r| r.retry_delay);

    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = executor::execute(
            store,
            ExecuteRequest {
                session_id_or_name: session_id_or_name.to_string(),
                command: cmd.command.clone(),
                args: cmd.args.clone(),
                cwd: cmd.cwd.clone(),
                env: cmd.env.clone(),
                timeout: None,
                max_stdout_lines,
                max_stderr_lines,
            },
        )
        .await;

        let result = match result {
            Ok(r) => r,
            Err(e) => CommandResult {
                command: cmd.command.clone(),
                stdout: String::new(),
                stderr: e.to_string(),
                exit_code: -1,
                success: false,
                duration_ms: 0,
                truncation: executor::Truncation::default(),
                warnings: Vec::new(),
                error: Some(e.code().to_string()),
                timed_out: false,
            },
        };

        if result.success || attempt >= max_attempts {
            return (result, attempt - 1);
        }

        tokio::time::sleep(delay).await;
    }
}

fn skipped_result(cmd: &BatchCommand, reason: String) -> BatchCommandResult {
    BatchCommandResult {
        id: Uuid::new_v4(),
        command: cmd.command.clone(),
        args: cmd.args.clone(),
        success: false,
        exit_code: None,
        stdout: String::new(),
        stderr: String::new(),
        duration_ms: 0,
        skipped: true,
        skip_reason: Some(reason),
        retries: 0,
        truncation: executor::Truncation::default(),
    }
}

fn to_batch_result(
    cmd: &BatchCommand,
    result: CommandResult,
    skipped: bool,
    skip_reason: Option<String>,
    retries: u32,
) -> BatchCommandResult {
    BatchCommandResult {
        id: Uuid::new_v4(),
        command: cmd.command.clone(),
        args: cmd.args.clone(),
        success: result.success,
        exit_code: Some(result.exit_code),
        stdout: result.stdout,
        stderr: result.stderr,
        duration_ms: result.duration_ms,
        skipped,
        skip_reason,
        retries,
        truncation: result.truncation,
    }
}

/// Resolve `targetIndex` (defaulting to the previous executed, non-skipped
/// command) and evaluate the condition against `results`.
fn evaluate_condition(condition: &Condition, results: &[BatchCommandResult]) -> bool {
    let target_index = condition.target_index.unwrap_or_else(|| {
        results
            .iter()
            .rposition(|r| !r.skipped)
            .unwrap_or(usize::MAX)
    });

    let Some(target) = results.get(target_index) else {
        return false;
    };
    if target.skipped {
        return false;
    }

    match condition.source {
        ConditionSource::ExitCode => {
            let actual = target.exit_code.unwrap_or(-1) as f64;
            compare_number(condition.operator, actual, &condition.value)
        }
        ConditionSource::Success => compare_bool(condition.operator, target.success, &condition.value),
        ConditionSource::Stdout => compare_string(condition.operator, &target.stdout, &condition.value),
        ConditionSource::Stderr => compare_string(condition.operator, &target.stderr, &condition.value),
        ConditionSource::PreviousCommand => {
            compare_string(condition.operator, &target.command, &condition.value)
        }
    }
}

fn compare_number(op: ConditionOperator, actual: f64, value: &serde_json::Value) -> bool {
    let Some(expected) = value.as_f64() else {
        return false;
    };
    match op {
        ConditionOperator::Equals => (actual - expected).abs() < f64::EPSILON,
        ConditionOperator::NotEquals => (actual - expected).abs() >= f64::EPSILON,
        ConditionOperator::GreaterThan => actual > expected,
        ConditionOperator::LessThan => actual < expected,
        _ => false,
    }
}

fn compare_bool(op: ConditionOperator, actual: bool, value: &serde_json::Value) -> bool {
    let Some(expected) = value.as_bool() else {
        return false;
    };
    match op {
        ConditionOperator::Equals => actual == expected,
        ConditionOperator::NotEquals => actual != expected,
        _ => false,
    }
}

fn compare_string(op: ConditionOperator, actual: &str, value: &serde_json::Value) -> bool {
    let Some(expected) = value.as_str() else {
        return false;
    };
    match op {
        ConditionOperator::Equals => actual == expected,
        ConditionOperator::NotEquals => actual != expected,
        ConditionOperator::Contains => actual.contains(expected),
        ConditionOperator::NotContains => !actual.contains(expected),
        ConditionOperator::Matches => Regex::new(expected).is_ok_and(|re| re.is_match(actual)),
        ConditionOperator::GreaterThan | ConditionOperator::LessThan => {
            match (actual.parse::<f64>(), expected.parse::<f64>()) {
                (Ok(a), Ok(b)) if op == ConditionOperator::GreaterThan => a > b,
                (Ok(a), Ok(b)) => a < b,
                _ => false,
            }
        }
    }
}
