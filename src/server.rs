//! MCP server: tool definitions wiring the JSON-RPC tool surface to the
//! session store (C4), process supervisor (C5), command executor (C6),
//! batch planner (C7), pattern searcher (C8), and interactive PTY manager
//! (C9).

use crate::batch::{self, BatchCommand, BatchRequest, Condition, ConditionOperator, ConditionSource, RetryPolicy};
use crate::dedup::Deduplicator;
use crate::error::Error;
use crate::executor::{self, CommandResult, ExecuteRequest};
use crate::interactive::{InteractiveManager, SshTarget};
use crate::search::PatternKind;
use crate::store::{SessionPatch, SessionStore, DEFAULT_SESSION_NAME};
use crate::supervisor::{CleanupMode, KillSignal, SaveFormat, StartOptions, Supervisor};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::schemars;
use rmcp::tool;
use rmcp::tool_handler;
use rmcp::tool_router;
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
const MAX_TIMEOUT_SECONDS: u64 = 3600;
const DEFAULT_MAX_OUTPUT_LINES: usize = 200;

fn env_vec(env: Option<HashMap<String, String>>) -> Option<Vec<(String, String)>> {
    env.map(std::iter::IntoIterator::into_iter).map(Iterator::collect)
}

fn clamp_timeout(seconds: Option<u64>) -> Duration {
    Duration::from_secs(seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS).min(MAX_TIMEOUT_SECONDS))
}

fn session_or_default(session: Option<String>) -> String {
    session.unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string())
}

fn parse_pattern_kind(s: Option<&str>) -> PatternKind {
    match s.unwrap_or("text") {
        "regex" => PatternKind::Regex,
        "glob" => PatternKind::Glob,
        _ => PatternKind::Text,
    }
}

fn parse_kill_signal(s: Option<&str>) -> KillSignal {
    match s.unwrap_or("graceful") {
        "force" => KillSignal::Force,
        _ => KillSignal::Graceful,
    }
}

fn parse_save_format(s: Option<&str>) -> SaveFormat {
    match s.unwrap_or("text") {
        "json" => SaveFormat::Json,
        _ => SaveFormat::Text,
    }
}

fn parse_cleanup_mode(s: Option<&str>) -> CleanupMode {
    match s.unwrap_or("list") {
        "kill" => CleanupMode::Kill,
        "interactive" => CleanupMode::Interactive,
        _ => CleanupMode::List,
    }
}

fn parse_condition_source(s: &str) -> Result<ConditionSource, String> {
    match s {
        "exitCode" => Ok(ConditionSource::ExitCode),
        "stdout" => Ok(ConditionSource::Stdout),
        "stderr" => Ok(ConditionSource::Stderr),
        "success" => Ok(ConditionSource::Success),
        "previousCommand" => Ok(ConditionSource::PreviousCommand),
        other => Err(format!("unknown condition source: {other}")),
    }
}

fn parse_condition_operator(s: &str) -> Result<ConditionOperator, String> {
    match s {
        "equals" => Ok(ConditionOperator::Equals),
        "notEquals" => Ok(ConditionOperator::NotEquals),
        "contains" => Ok(ConditionOperator::Contains),
        "notContains" => Ok(ConditionOperator::NotContains),
        "matches" => Ok(ConditionOperator::Matches),
        "greaterThan" => Ok(ConditionOperator::GreaterThan),
        "lessThan" => Ok(ConditionOperator::LessThan),
        other => Err(format!("unknown condition operator: {other}")),
    }
}

fn parse_uuid(id: &str) -> Result<Uuid, McpError> {
    Uuid::parse_str(id).map_err(|_| McpError::invalid_params(format!("'{id}' is not a valid id"), None))
}

fn json_content<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("JSON serialization error: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn err_result(err: &Error) -> Result<CallToolResult, McpError> {
    let wire = err.to_wire();
    let json = serde_json::to_string_pretty(&serde_json::json!({ "error": wire }))
        .unwrap_or_else(|_| wire.message.clone());
    Ok(CallToolResult::error(vec![Content::text(json)]))
}

fn err_msg(msg: impl Into<String>) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.into())]))
}

// ---------------------------------------------------------------------------
// Parameter structs
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct RunCommandParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_error_lines: Option<usize>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct BatchCommandParam {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub continue_on_error: bool,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct BatchExecuteParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub commands: Vec<BatchCommandParam>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub stop_on_first_failure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stdout_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stderr_lines: Option<usize>,
}

fn default_max_parallel() -> usize {
    4
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ConditionParam {
    pub source: String,
    pub operator: String,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_index: Option<usize>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct RetryParam {
    pub retry_count: u32,
    #[serde(default)]
    pub retry_delay_ms: u64,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct BatchCommandEnhancedParam {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryParam>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct BatchExecuteEnhancedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub commands: Vec<BatchCommandEnhancedParam>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub stop_on_first_failure: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stdout_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stderr_lines: Option<usize>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct RunBackgroundParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ListProcessesParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub include_orphaned: bool,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct GetProcessOutputParams {
    pub process_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_type: Option<String>,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub invert_match: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_context: Option<usize>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct StreamProcessOutputParams {
    pub process_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lines: Option<usize>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct KillProcessParams {
    pub process_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SaveProcessOutputParams {
    pub process_id: String,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub include_metadata: bool,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CleanupOrphansParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct KillAllMatchingParams {
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CreateShellSessionParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CloseSessionParams {
    pub session: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CdParams {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct PwdParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct HistoryParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SshInteractiveStartParams {
    /// Remote host to SSH into. Omit to open a local PTY session instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    /// Local-session working directory; ignored for SSH sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SshInteractiveSendParams {
    pub id: String,
    pub text: String,
    #[serde(default = "default_true")]
    pub append_newline: bool,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SshInteractiveControlParams {
    pub id: String,
    /// A control-character name, e.g. `"C"` for Ctrl-C.
    pub key: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SshInteractiveOutputParams {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_line: Option<u64>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SshInteractiveWaitParams {
    pub id: String,
    #[serde(default)]
    pub after_line: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SshInteractiveResizeParams {
    pub id: String,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SshInteractiveCloseParams {
    pub id: String,
}

// ---------------------------------------------------------------------------
// MCP server
// ---------------------------------------------------------------------------

/// The shellsup MCP server: one session store, one process supervisor, and
/// one interactive-session manager shared by every tool call.
#[derive(Clone)]
pub struct ShellSupServer {
    store: Arc<SessionStore>,
    supervisor: Arc<Supervisor>,
    interactive: Arc<InteractiveManager>,
    dedup: Arc<Deduplicator<CommandResult>>,
    tool_router: ToolRouter<ShellSupServer>,
}

impl ShellSupServer {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        supervisor: Arc<Supervisor>,
        interactive: Arc<InteractiveManager>,
        dedup: Arc<Deduplicator<CommandResult>>,
    ) -> Self {
        Self {
            store,
            supervisor,
            interactive,
            dedup,
            tool_router: Self::tool_router(),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn interactive(&self) -> &Arc<InteractiveManager> {
        &self.interactive
    }
}

#[tool_router]
impl ShellSupServer {
    // -- Command execution ---------------------------------------------------

    #[tool(
        description = "Run a command to completion against a named session's cwd/env (default session if omitted). Returns stdout/stderr (deterministically truncated), exit_code, duration, and truncation bookkeeping. Records the call into the session's history."
    )]
    async fn run_command(&self, Parameters(params): Parameters<RunCommandParams>) -> Result<CallToolResult, McpError> {
        let session = session_or_default(params.session);
        let request = ExecuteRequest {
            session_id_or_name: session,
            command: params.command,
            args: params.args,
            cwd: params.cwd,
            env: env_vec(params.env),
            timeout: Some(clamp_timeout(params.timeout_seconds)),
            max_stdout_lines: params.max_output_lines.unwrap_or(DEFAULT_MAX_OUTPUT_LINES),
            max_stderr_lines: params.max_error_lines.unwrap_or(DEFAULT_MAX_OUTPUT_LINES),
        };

        // Identical concurrent run_command calls (same session/command/args/
        // cwd/env) are coalesced through C10 rather than each spawning their
        // own child.
        let dedup_key = Deduplicator::<CommandResult>::key_for(&serde_json::json!({
            "session": request.session_id_or_name,
            "command": request.command,
            "args": request.args,
            "cwd": request.cwd,
            "env": request.env,
        }).to_string());

        let store = Arc::clone(&self.store);
        let outcome = self
            .dedup
            .execute(dedup_key, move || async move { executor::execute(&store, request).await })
            .await;
        match outcome {
            Ok(result) => json_content(&result),
            Err(msg) => err_msg(msg),
        }
    }

    #[tool(
        description = "Execute a plan of commands in order, or with bounded parallelism. Each command may set continue_on_error. See batch_execute_enhanced for conditions and retries."
    )]
    async fn batch_execute(&self, Parameters(params): Parameters<BatchExecuteParams>) -> Result<CallToolResult, McpError> {
        let commands = params
            .commands
            .into_iter()
            .map(|c| BatchCommand {
                command: c.command,
                args: c.args,
                cwd: c.cwd,
                env: env_vec(c.env),
                continue_on_error: c.continue_on_error,
                condition: None,
                retry: None,
            })
            .collect();

        let request = BatchRequest {
            session_id_or_name: session_or_default(params.session),
            commands,
            parallel: params.parallel,
            max_parallel: params.max_parallel,
            stop_on_first_failure: params.stop_on_first_failure,
            max_stdout_lines: params.max_stdout_lines.unwrap_or(DEFAULT_MAX_OUTPUT_LINES),
            max_stderr_lines: params.max_stderr_lines.unwrap_or(DEFAULT_MAX_OUTPUT_LINES),
        };

        match batch::run_batch(Arc::clone(&self.store), request).await {
            Ok(report) => json_content(&report),
            Err(e) => err_result(&e),
        }
    }

    #[tool(
        description = "Execute a plan of commands with per-command conditions (gating on a prior command's exitCode/stdout/stderr/success) and retry policies, sequentially or with bounded parallelism (conditions are skipped in parallel mode)."
    )]
    async fn batch_execute_enhanced(
        &self,
        Parameters(params): Parameters<BatchExecuteEnhancedParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut commands = Vec::with_capacity(params.commands.len());
        for c in params.commands {
            let condition = match c.condition {
                Some(cond) => {
                    let source = match parse_condition_source(&cond.source) {
                        Ok(s) => s,
                        Err(e) => return err_msg(e),
                    };
                    let operator = match parse_condition_operator(&cond.operator) {
                        Ok(o) => o,
                        Err(e) => return err_msg(e),
                    };
                    Some(Condition {
                        source,
                        operator,
                        value: cond.value,
                        target_index: cond.target_index,
                    })
                }
                None => None,
            };
            let retry = c.retry.map(|r| RetryPolicy {
                retry_count: r.retry_count,
                retry_delay: Duration::from_millis(r.retry_delay_ms),
            });

            commands.push(BatchCommand {
                command: c.command,
                args: c.args,
                cwd: c.cwd,
                env: env_vec(c.env),
                continue_on_error: c.continue_on_error,
                condition,
                retry,
            });
        }

        let request = BatchRequest {
            session_id_or_name: session_or_default(params.session),
            commands,
            parallel: params.parallel,
            max_parallel: params.max_parallel,
            stop_on_first_failure: params.stop_on_first_failure,
            max_stdout_lines: params.max_stdout_lines.unwrap_or(DEFAULT_MAX_OUTPUT_LINES),
            max_stderr_lines: params.max_stderr_lines.unwrap_or(DEFAULT_MAX_OUTPUT_LINES),
        };

        match batch::run_batch(Arc::clone(&self.store), request).await {
            Ok(report) => json_content(&report),
            Err(e) => err_result(&e),
        }
    }

    // -- Background process supervision --------------------------------------

    #[tool(
        description = "Launch a command as a supervised background process belonging to a session (default if omitted). Returns immediately with the process's id and status; stdout/stderr stream into a searchable bounded buffer retrieved via get_process_output/stream_process_output."
    )]
    async fn run_background(&self, Parameters(params): Parameters<RunBackgroundParams>) -> Result<CallToolResult, McpError> {
        let session_name = session_or_default(params.session);
        let session = match self.store.get(&session_name).await {
            Ok(s) => s,
            Err(e) => return err_result(&e),
        };

        let opts = StartOptions {
            cwd: Some(session.cwd.clone()),
            env: Some(session.env.clone()),
            name: params.name,
        };

        match self.supervisor.start(session.id, params.command, params.args, opts).await {
            Ok(summary) => json_content(&summary),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "List supervised background processes, optionally filtered to one session, paginated, and optionally including ORPHANED processes.")]
    async fn list_processes(&self, Parameters(params): Parameters<ListProcessesParams>) -> Result<CallToolResult, McpError> {
        let session_id = match params.session {
            Some(s) => match self.store.get(&s).await {
                Ok(session) => Some(session.id),
                Err(e) => return err_result(&e),
            },
            None => None,
        };

        let mut processes = self.supervisor.list(session_id, params.include_orphaned).await;
        let total = processes.len();
        let offset = params.offset.min(total);
        processes = processes.split_off(offset);
        if let Some(limit) = params.limit {
            processes.truncate(limit);
        }

        json_content(&serde_json::json!({ "processes": processes, "total": total }))
    }

    #[tool(
        description = "Retrieve buffered output from a background process. Combines line-range retrieval with optional text/regex/glob search and context-line expansion."
    )]
    async fn get_process_output(&self, Parameters(params): Parameters<GetProcessOutputParams>) -> Result<CallToolResult, McpError> {
        let id = match parse_uuid(&params.process_id) {
            Ok(id) => id,
            Err(e) => return Err(e),
        };

        let search_pattern = params
            .search
            .as_deref()
            .map(|p| (p, parse_pattern_kind(params.search_type.as_deref()), params.case_sensitive, params.invert_match));

        match self
            .supervisor
            .get_output(id, params.lines, params.from_line, search_pattern, params.show_context)
            .await
        {
            Ok(lines) => json_content(&lines),
            Err(e) => err_result(&e),
        }
    }

    #[tool(
        description = "Block (up to timeout_seconds) for new output on a background process past after_line, returning the new lines and the last line number observed -- for resumable tailing."
    )]
    async fn stream_process_output(
        &self,
        Parameters(params): Parameters<StreamProcessOutputParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = match parse_uuid(&params.process_id) {
            Ok(id) => id,
            Err(e) => return Err(e),
        };
        let timeout = Duration::from_secs(params.timeout_seconds.unwrap_or(30));

        match self
            .supervisor
            .stream_output(id, params.after_line.unwrap_or(0), timeout, params.max_lines)
            .await
        {
            Ok((lines, last_line)) => json_content(&serde_json::json!({ "lines": lines, "lastLine": last_line })),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "Send SIGTERM (graceful) or SIGKILL (force) to a background process's process group.")]
    async fn kill_process(&self, Parameters(params): Parameters<KillProcessParams>) -> Result<CallToolResult, McpError> {
        let id = match parse_uuid(&params.process_id) {
            Ok(id) => id,
            Err(e) => return Err(e),
        };
        match self.supervisor.kill(id, parse_kill_signal(params.signal.as_deref())).await {
            Ok(summary) => json_content(&summary),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "Write a background process's buffered output to a file, atomically, as plain text or JSON.")]
    async fn save_process_output(&self, Parameters(params): Parameters<SaveProcessOutputParams>) -> Result<CallToolResult, McpError> {
        let id = match parse_uuid(&params.process_id) {
            Ok(id) => id,
            Err(e) => return Err(e),
        };
        let path = std::path::Path::new(&params.file_path);
        match self
            .supervisor
            .save_output(id, path, parse_save_format(params.format.as_deref()), params.include_metadata)
            .await
        {
            Ok(()) => json_content(&serde_json::json!({ "processId": params.process_id, "filePath": params.file_path })),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "List, kill, or produce an advisory for ORPHANED background processes (those recovered across a supervisor restart that are no longer descendants).")]
    async fn cleanup_orphans(&self, Parameters(params): Parameters<CleanupOrphansParams>) -> Result<CallToolResult, McpError> {
        let report = self
            .supervisor
            .cleanup_orphans(parse_cleanup_mode(params.mode.as_deref()), params.force)
            .await;
        json_content(&report)
    }

    #[tool(description = "Match a text/regex pattern against every live process's command line and signal the matches, or just preview the match set with dry_run.")]
    async fn kill_all_matching(&self, Parameters(params): Parameters<KillAllMatchingParams>) -> Result<CallToolResult, McpError> {
        let kind = parse_pattern_kind(params.pattern_type.as_deref());
        match self
            .supervisor
            .kill_all_matching(&params.pattern, kind, parse_kill_signal(params.signal.as_deref()), params.dry_run)
            .await
        {
            Ok(result) => json_content(&result),
            Err(e) => err_result(&e),
        }
    }

    // -- Shell sessions --------------------------------------------------------

    #[tool(description = "Create a named, persistent session: working directory, environment, and command history that survive across run_command/run_background calls. Fails if the name is already in use.")]
    async fn create_shell_session(&self, Parameters(params): Parameters<CreateShellSessionParams>) -> Result<CallToolResult, McpError> {
        match self.store.create(params.name, params.cwd, env_vec(params.env)).await {
            Ok(session) => json_content(&session),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "List all known sessions (including the default session) with their cwd, creation time, and last-used time.")]
    async fn list_shell_sessions(&self) -> Result<CallToolResult, McpError> {
        let sessions = self.store.list_sessions().await;
        json_content(&sessions)
    }

    #[tool(description = "Delete a session. Refuses to delete the default session. Kills any background processes still owned by it.")]
    async fn close_session(&self, Parameters(params): Parameters<CloseSessionParams>) -> Result<CallToolResult, McpError> {
        let session = match self.store.get(&params.session).await {
            Ok(s) => s,
            Err(e) => return err_result(&e),
        };
        match self.store.delete(&params.session).await {
            Ok(()) => {
                self.supervisor.kill_all_in_session(session.id).await;
                json_content(&serde_json::json!({ "session": params.session, "closed": true }))
            }
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "Change a session's working directory (default session if omitted). Subsequent run_command/run_background calls in the session use the new cwd.")]
    async fn cd(&self, Parameters(params): Parameters<CdParams>) -> Result<CallToolResult, McpError> {
        let session = session_or_default(params.session);
        let patch = SessionPatch {
            cwd: Some(params.path),
            env: None,
        };
        match self.store.update(&session, patch).await {
            Ok(session) => json_content(&serde_json::json!({ "cwd": session.cwd })),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "Return a session's current working directory (default session if omitted).")]
    async fn pwd(&self, Parameters(params): Parameters<PwdParams>) -> Result<CallToolResult, McpError> {
        let session = session_or_default(params.session);
        match self.store.get(&session).await {
            Ok(session) => json_content(&serde_json::json!({ "cwd": session.cwd })),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "Return a session's recent command history (most recent first up to limit), default session if omitted.")]
    async fn history(&self, Parameters(params): Parameters<HistoryParams>) -> Result<CallToolResult, McpError> {
        let session = session_or_default(params.session);
        match self.store.history(&session, params.limit).await {
            Ok(entries) => json_content(&entries),
            Err(e) => err_result(&e),
        }
    }

    // -- Interactive PTY sessions (SSH and local) ------------------------------

    #[tool(
        description = "Start an interactive PTY session: SSH into host/user/port with password or private_key_path, or (if host is omitted) open a local bash PTY in cwd. Connection status becomes CONNECTED/ERROR once the output stream matches a known prompt/greeting or an auth-failure pattern, within CONNECT_TIMEOUT."
    )]
    async fn ssh_interactive_start(&self, Parameters(params): Parameters<SshInteractiveStartParams>) -> Result<CallToolResult, McpError> {
        let result = match params.host {
            Some(host) => {
                let target = SshTarget {
                    host,
                    port: params.port.unwrap_or(22),
                    user: params.user.unwrap_or_else(|| "root".to_string()),
                    password: params.password,
                    private_key_path: params.private_key_path,
                };
                self.interactive.start_ssh(target).await
            }
            None => self.interactive.start_local(params.cwd.as_deref(), None).await,
        };
        match result {
            Ok(metadata) => json_content(&metadata),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "Send literal text to an interactive session's PTY (escape sequences like \\n, \\t, \\xNN are processed), with an optional trailing newline.")]
    async fn ssh_interactive_send(&self, Parameters(params): Parameters<SshInteractiveSendParams>) -> Result<CallToolResult, McpError> {
        let id = match parse_uuid(&params.id) {
            Ok(id) => id,
            Err(e) => return Err(e),
        };
        match self.interactive.send(id, &params.text, params.append_newline).await {
            Ok(()) => json_content(&serde_json::json!({ "id": params.id, "sent": true })),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "Send a named control character to an interactive session's PTY, e.g. key=\"C\" sends Ctrl-C (0x03).")]
    async fn ssh_interactive_control(&self, Parameters(params): Parameters<SshInteractiveControlParams>) -> Result<CallToolResult, McpError> {
        let id = match parse_uuid(&params.id) {
            Ok(id) => id,
            Err(e) => return Err(e),
        };
        match self.interactive.control(id, &params.key).await {
            Ok(()) => json_content(&serde_json::json!({ "id": params.id, "sent": true })),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "Read buffered, ANSI-stripped output from an interactive session, optionally limited to the most recent N lines after a given line number.")]
    async fn ssh_interactive_output(&self, Parameters(params): Parameters<SshInteractiveOutputParams>) -> Result<CallToolResult, McpError> {
        let id = match parse_uuid(&params.id) {
            Ok(id) => id,
            Err(e) => return Err(e),
        };
        match self.interactive.output(id, params.limit, params.after_line).await {
            Ok(lines) => json_content(&lines),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "Block (up to timeout_seconds) for new output on an interactive session past after_line.")]
    async fn ssh_interactive_wait(&self, Parameters(params): Parameters<SshInteractiveWaitParams>) -> Result<CallToolResult, McpError> {
        let id = match parse_uuid(&params.id) {
            Ok(id) => id,
            Err(e) => return Err(e),
        };
        let timeout = Duration::from_secs(params.timeout_seconds.unwrap_or(30));
        match self.interactive.wait(id, params.after_line, timeout).await {
            Ok(lines) => json_content(&lines),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "Resize an interactive session's PTY to cols x rows.")]
    async fn ssh_interactive_resize(&self, Parameters(params): Parameters<SshInteractiveResizeParams>) -> Result<CallToolResult, McpError> {
        let id = match parse_uuid(&params.id) {
            Ok(id) => id,
            Err(e) => return Err(e),
        };
        match self.interactive.resize(id, params.cols, params.rows).await {
            Ok(()) => json_content(&serde_json::json!({ "id": params.id, "resized": true })),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "Close an interactive session. Idempotent.")]
    async fn ssh_interactive_close(&self, Parameters(params): Parameters<SshInteractiveCloseParams>) -> Result<CallToolResult, McpError> {
        let id = match parse_uuid(&params.id) {
            Ok(id) => id,
            Err(e) => return Err(e),
        };
        match self.interactive.close(id).await {
            Ok(()) => json_content(&serde_json::json!({ "id": params.id, "closed": true })),
            Err(e) => err_result(&e),
        }
    }

    #[tool(description = "List all interactive sessions with metadata only (id, host, user, port, status, start time, total lines, last activity) -- never credentials.")]
    async fn ssh_interactive_list(&self) -> Result<CallToolResult, McpError> {
        let sessions = self.interactive.list().await;
        json_content(&sessions)
    }
}

#[tool_handler]
impl ServerHandler for ShellSupServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "shellsup".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "shellsup is a shell/process supervisor for AI agents.\n\n\
                 SESSIONS: create_shell_session opens a named session with its own \
                 working directory, environment, and command history; run_command and \
                 run_background execute against a session (the \"default\" session always \
                 exists). cd/pwd/history operate on a session without running anything.\n\n\
                 BACKGROUND PROCESSES: run_background starts a supervised child whose \
                 output streams into a searchable bounded buffer. Use list_processes, \
                 get_process_output (supports text/regex/glob search with context lines), \
                 stream_process_output (blocking tail), kill_process, save_process_output, \
                 cleanup_orphans, and kill_all_matching to manage them.\n\n\
                 BATCHES: batch_execute runs an ordered or bounded-parallel plan of \
                 commands; batch_execute_enhanced adds per-command conditions (gating on \
                 a previous command's exit code/output) and retry policies.\n\n\
                 INTERACTIVE PTY SESSIONS: ssh_interactive_start opens a real PTY -- SSH \
                 into a host, or a local bash shell if host is omitted -- for programs \
                 that need a terminal (vim, top, interactive CLIs). send/control/output/ \
                 wait/resize/close/list operate on the returned session id."
                    .to_string(),
            ),
        }
    }
}
