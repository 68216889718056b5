//! Command executor (C6): runs a child to completion against an explicit
//! session cwd/env snapshot, with deterministic head+tail output truncation
//! and history recording.
//!
//! Generalizes the teacher's process-spawning path to take an explicit
//! `cwd`/`env` rather than only the server's own, and to apply spec's exact
//! truncation policy in place of `output::window`'s simpler head+tail view
//! (`output::window`/`output::extract_errors` remain the convenience view
//! surfaced in `CommandResult`, not the truncation source of truth). Dangerous-
//! command blocking and env sanitization are reused as-is from `process.rs`.

use crate::error::Error;
use crate::output;
use crate::process;
use crate::store::{CommandHistoryEntry, SessionStore};
use chrono::Utc;
use serde::Serialize;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

/// Hard ceiling on captured lines per stream, independent of the caller's
/// `maxStdoutLines`/`maxStderrLines` truncation request; a child that blows
/// past this is a buffer-overflow failure, not just a long result.
const MAX_BUFFERED_LINES: usize = 200_000;

/// Per-stream truncation bookkeeping, always recorded regardless of whether
/// truncation actually happened.
#[derive(Debug, Clone, Serialize)]
pub struct StreamTruncation {
    pub total_lines: usize,
    pub returned_lines: usize,
    pub total_bytes: usize,
    pub returned_bytes: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Truncation {
    pub stdout: Option<StreamTruncation>,
    pub stderr: Option<StreamTruncation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
    pub truncation: Truncation,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub session_id_or_name: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: Option<Vec<(String, String)>>,
    pub timeout: Option<Duration>,
    pub max_stdout_lines: usize,
    pub max_stderr_lines: usize,
}

/// Run `request.command` to completion against the named session's cwd/env
/// (overridden by any explicit `cwd`/`env` on the request), recording the
/// outcome into the session's history.
pub async fn execute(store: &SessionStore, request: ExecuteRequest) -> Result<CommandResult, Error> {
    let session = store.get(&request.session_id_or_name).await?;

    if request.command.trim().is_empty() {
        return Err(Error::Invalid("command must not be empty".to_string()));
    }

    let full_command = full_command_line(&request.command, &request.args);
    if let Err(reason) = process::validate_command(&full_command) {
        return Err(Error::Invalid(reason));
    }

    let cwd = request.cwd.clone().unwrap_or_else(|| session.cwd.clone());
    let env = request.env.clone().unwrap_or_else(|| session.env.clone());

    let start = Instant::now();
    let start_time = Utc::now();

    let mut cmd = Command::new(&request.command);
    cmd.args(&request.args);
    cmd.current_dir(&cwd);
    cmd.env_clear();
    for (k, v) in &env {
        if !process::is_sensitive_env(k) {
            cmd.env(k, v);
        }
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);

    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(std::io::Error::other)?;
            Ok(())
        });
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Ok(finish_and_record(
                store,
                &request,
                &cwd,
                start_time,
                start,
                CommandResult {
                    command: full_command,
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: -1,
                    success: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                    truncation: Truncation::default(),
                    warnings: Vec::new(),
                    error: Some(format!("failed to spawn: {e}")),
                    timed_out: false,
                },
            )
            .await);
        }
    };

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let stdout_task = tokio::spawn(collect_lines(stdout));
    let stderr_task = tokio::spawn(collect_lines(stderr));

    let (timed_out, exit_code) = if let Some(timeout) = request.timeout {
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (false, status.code().unwrap_or(-1)),
            Ok(Err(_)) => (false, -1),
            Err(_) => {
                terminate_with_grace(&child).await;
                let _ = child.wait().await;
                (true, -1)
            }
        }
    } else {
        match child.wait().await {
            Ok(status) => (false, status.code().unwrap_or(-1)),
            Err(_) => (false, -1),
        }
    };

    let stdout_lines = stdout_task.await.unwrap_or_default();
    let stderr_lines = stderr_task.await.unwrap_or_default();

    let (stdout_text, stdout_trunc) = truncate_stream(&stdout_lines, request.max_stdout_lines);
    let (stderr_text, stderr_trunc) = truncate_stream(&stderr_lines, request.max_stderr_lines);

    let mut warnings = Vec::new();
    let mut error = None;
    if stdout_lines.len() > MAX_BUFFERED_LINES || stderr_lines.len() > MAX_BUFFERED_LINES {
        warnings.push("Output exceeded buffer limit".to_string());
        error = Some("ERR_CHILD_PROCESS_STDIO_MAXBUFFER".to_string());
    }
    if timed_out {
        error = Some("ETIMEDOUT".to_string());
    }

    let success = !timed_out && exit_code == 0 && error.is_none();

    let result = CommandResult {
        command: full_command,
        stdout: stdout_text,
        stderr: stderr_text,
        exit_code,
        success,
        duration_ms: start.elapsed().as_millis() as u64,
        truncation: Truncation {
            stdout: Some(stdout_trunc),
            stderr: Some(stderr_trunc),
        },
        warnings,
        error,
        timed_out,
    };

    Ok(finish_and_record(store, &request, &cwd, start_time, start, result).await)
}

async fn finish_and_record(
    store: &SessionStore,
    request: &ExecuteRequest,
    _cwd: &str,
    start_time: chrono::DateTime<Utc>,
    start: Instant,
    result: CommandResult,
) -> CommandResult {
    let entry = CommandHistoryEntry {
        command: request.command.clone(),
        args: request.args.clone(),
        exit_code: if result.exit_code == -1 && result.error.is_some() {
            None
        } else {
            Some(result.exit_code)
        },
        stdout: Some(result.stdout.clone()),
        stderr: Some(result.stderr.clone()),
        start_time,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    if let Err(e) = store.append_history(&request.session_id_or_name, entry).await {
        tracing::error!(error = %e, "failed to record command history");
    }

    result
}

async fn collect_lines(reader: impl tokio::io::AsyncRead + Unpin) -> Vec<String> {
    let mut reader = BufReader::new(reader);
    let mut out = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                if out.len() < MAX_BUFFERED_LINES + 1 {
                    out.push(String::from_utf8_lossy(&buf).to_string());
                }
            }
            Err(_) => break,
        }
    }
    out
}

/// Apply spec's deterministic truncation: NUL-byte binary detection, then
/// long-line guard, then 60/40 head+tail elision.
fn truncate_stream(lines: &[String], max_lines: usize) -> (String, StreamTruncation) {
    let total_lines = lines.len();
    let total_bytes: usize = lines.iter().map(|l| l.len() + 1).sum();

    if lines.iter().any(|l| l.contains('\0')) {
        let text = "[Binary output detected - content omitted]".to_string();
        return (
            text.clone(),
            StreamTruncation {
                total_lines,
                returned_lines: 0,
                total_bytes,
                returned_bytes: text.len(),
                truncated: true,
            },
        );
    }

    let max_single_line_len = crate::config::max_single_line_len();
    if lines.iter().any(|l| l.len() > max_single_line_len) {
        let text = "[Output contains extremely long lines - content omitted]".to_string();
        return (
            text.clone(),
            StreamTruncation {
                total_lines,
                returned_lines: 0,
                total_bytes,
                returned_bytes: text.len(),
                truncated: true,
            },
        );
    }

    if total_lines <= max_lines {
        let text = lines.join("\n");
        return (
            text.clone(),
            StreamTruncation {
                total_lines,
                returned_lines: total_lines,
                total_bytes,
                returned_bytes: text.len(),
                truncated: false,
            },
        );
    }

    let head_count = (max_lines * 60) / 100;
    let tail_count = max_lines.saturating_sub(head_count);
    let omitted = total_lines - (head_count + tail_count);

    let mut kept: Vec<&str> = Vec::with_capacity(head_count + tail_count + 1);
    kept.extend(lines[..head_count].iter().map(String::as_str));
    let marker = format!("[... {omitted} lines omitted ...]");
    kept.push(marker.as_str());
    kept.extend(lines[total_lines - tail_count..].iter().map(String::as_str));

    let text = kept.join("\n");
    (
        text.clone(),
        StreamTruncation {
            total_lines,
            returned_lines: head_count + tail_count,
            total_bytes,
            returned_bytes: text.len(),
            truncated: true,
        },
    )
}

async fn terminate_with_grace(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(-(pid as i32)),
            nix::sys::signal::Signal::SIGTERM,
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(-(pid as i32)),
            nix::sys::signal::Signal::SIGKILL,
        );
    }
}

fn full_command_line(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{command} {}", args.join(" "))
    }
}

/// Convenience view matching the teacher's `output::window` shape, derived
/// from a finished command's combined stdout for tool replies that want a
/// head/tail/error-lines summary instead of raw truncated text.
#[must_use]
pub fn convenience_view(result: &CommandResult, max_lines: usize) -> output::OutputWindow {
    let combined: Vec<String> = result
        .stdout
        .lines()
        .chain(result.stderr.lines())
        .map(str::to_string)
        .collect();
    output::window(&combined, max_lines)
}

pub type CommandId = Uuid;
