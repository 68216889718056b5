//! Process supervisor (C5): spawns and tracks background child processes,
//! attaches a [`LineBuffer`] per stream, detects orphans across restarts,
//! and samples CPU/RSS.
//!
//! Supersedes the teacher's `registry.rs`. Reuses `process::validate_command`
//! and the sensitive-env-stripping helper, and the same `setsid()`
//! `pre_exec` trick so the whole process group can be signalled.

use crate::buffer::{LineBuffer, Stream};
use crate::config;
use crate::error::{Error, Result};
use crate::persistence::Persistence;
use crate::process;
use crate::search::{self, MatchOptions, PatternCache, PatternKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessStatus {
    Starting,
    Running,
    Stopped,
    Failed,
    Killed,
    Orphaned,
}

impl ProcessStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessStatus::Stopped | ProcessStatus::Failed | ProcessStatus::Killed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KillSignal {
    Graceful,
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub rss_bytes: u64,
    pub memory_percent: f32,
    pub sampled_at: DateTime<Utc>,
}

/// On-disk shape of a process record, used both for the live supervisor
/// table and for persistence/orphan-detection on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedProcess {
    pub id: Uuid,
    pub session_id: Uuid,
    pub command: String,
    pub args: Vec<String>,
    pub pid: u32,
    pub status: ProcessStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub name: Option<String>,
}

/// A supervised background process, live in memory.
pub struct BackgroundProcess {
    pub id: Uuid,
    pub session_id: Uuid,
    pub command: String,
    pub args: Vec<String>,
    pub pid: u32,
    pub pgid: i32,
    pub name: Option<String>,
    pub status: RwLock<ProcessStatus>,
    pub start_time: DateTime<Utc>,
    pub end_time: RwLock<Option<DateTime<Utc>>>,
    pub exit_code: RwLock<Option<i32>>,
    pub buffer: Arc<LineBuffer>,
    pub last_sample: RwLock<Option<ResourceSample>>,
    pub sample_history: RwLock<Vec<f32>>,
    pub sample_count: AtomicU32,
}

/// Snapshot summary returned to callers (never holds live locks).
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub id: Uuid,
    pub session_id: Uuid,
    pub command: String,
    pub args: Vec<String>,
    pub pid: u32,
    pub name: Option<String>,
    pub status: ProcessStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub last_sample: Option<ResourceSample>,
    pub sample_count: u32,
    pub trend: Option<Trend>,
}

impl BackgroundProcess {
    async fn summary(&self) -> ProcessSummary {
        let history = self.sample_history.read().await;
        let trend = trend_from_history(&history);
        ProcessSummary {
            id: self.id,
            session_id: self.session_id,
            command: self.command.clone(),
            args: self.args.clone(),
            pid: self.pid,
            name: self.name.clone(),
            status: *self.status.read().await,
            start_time: self.start_time,
            end_time: *self.end_time.read().await,
            exit_code: *self.exit_code.read().await,
            last_sample: self.last_sample.read().await.clone(),
            sample_count: self.sample_count.load(Ordering::Relaxed),
            trend,
        }
    }

    fn to_persisted(&self, status: ProcessStatus, end_time: Option<DateTime<Utc>>, exit_code: Option<i32>) -> PersistedProcess {
        PersistedProcess {
            id: self.id,
            session_id: self.session_id,
            command: self.command.clone(),
            args: self.args.clone(),
            pid: self.pid,
            status,
            start_time: self.start_time,
            end_time,
            exit_code,
            name: self.name.clone(),
        }
    }
}

fn trend_from_history(history: &[f32]) -> Option<Trend> {
    if history.len() < 2 {
        return None;
    }
    let first = history[0];
    let last = *history.last().unwrap();
    let delta = last - first;
    if delta.abs() < 1.0 {
        Some(Trend::Stable)
    } else if delta > 0.0 {
        Some(Trend::Increasing)
    } else {
        Some(Trend::Decreasing)
    }
}

/// Options accepted by `start`.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub cwd: Option<String>,
    pub env: Option<Vec<(String, String)>>,
    pub name: Option<String>,
}

pub enum CleanupMode {
    List,
    Kill,
    Interactive,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub mode: &'static str,
    pub processes: Vec<ProcessSummary>,
    pub killed: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KillAllResult {
    pub matched: Vec<Uuid>,
    pub killed: Vec<Uuid>,
    pub dry_run: bool,
}

struct Table {
    processes: HashMap<Uuid, Arc<BackgroundProcess>>,
}

/// Owns the live process table, persistence, and the background sampler/
/// grace-window-reaper tasks.
pub struct Supervisor {
    table: RwLock<Table>,
    persistence: Arc<Persistence>,
    pattern_cache: PatternCache,
    my_pid: u32,
}

impl Supervisor {
    #[must_use]
    pub fn new(persistence: Arc<Persistence>) -> Self {
        Self {
            table: RwLock::new(Table {
                processes: HashMap::new(),
            }),
            persistence,
            pattern_cache: PatternCache::with_default_capacity(),
            my_pid: std::process::id(),
        }
    }

    /// Load persisted process records and mark any still-alive-but-not-a-
    /// descendant PID as ORPHANED. Records for PIDs that are no longer alive
    /// are dropped (their process file is removed).
    pub async fn recover_orphans(&self) {
        let persisted = self.persistence.load_all_processes().await;
        for record in persisted {
            if record.status.is_terminal() {
                continue;
            }
            if !pid_is_alive(record.pid) {
                let _ = self.persistence.delete_process(&record.id).await;
                continue;
            }
            if pid_is_descendant(record.pid, self.my_pid) {
                // Still genuinely ours across a graceful-but-imperfect
                // restart path; we cannot reattach its pipes, so treat as
                // orphaned too -- we have no live buffer for it.
            }
            let buffer = Arc::new(LineBuffer::with_default_capacity());
            let process = Arc::new(BackgroundProcess {
                id: record.id,
                session_id: record.session_id,
                command: record.command.clone(),
                args: record.args.clone(),
                pid: record.pid,
                pgid: record.pid as i32,
                name: record.name.clone(),
                status: RwLock::new(ProcessStatus::Orphaned),
                start_time: record.start_time,
                end_time: RwLock::new(None),
                exit_code: RwLock::new(None),
                buffer,
                last_sample: RwLock::new(None),
                sample_history: RwLock::new(Vec::new()),
                sample_count: AtomicU32::new(0),
            });
            crate::buffer::spawn_sweeper(Arc::clone(&process.buffer));
            let mut table = self.table.write().await;
            table.processes.insert(process.id, process);
            drop(table);
            let persisted = PersistedProcess {
                status: ProcessStatus::Orphaned,
                ..record
            };
            let _ = self.persistence.save_process(&persisted).await;
        }
    }

    /// Spawn a child process belonging to `session_id`, capturing stdout and
    /// stderr into a fresh [`LineBuffer`].
    pub async fn start(
        &self,
        session_id: Uuid,
        command: String,
        args: Vec<String>,
        opts: StartOptions,
    ) -> Result<ProcessSummary> {
        let full_command = full_command_line(&command, &args);
        if let Err(reason) = process::validate_command(&full_command) {
            return Err(Error::Invalid(reason));
        }

        let mut cmd = Command::new(&command);
        cmd.args(&args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(false);

        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = &opts.env {
            cmd.env_clear();
            for (k, v) in env {
                if !process::is_sensitive_env(k) {
                    cmd.env(k, v);
                }
            }
        }

        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::other)?;
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::ExternalFailure(format!("failed to spawn process: {e}")))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::ExternalFailure("spawned process has no PID".to_string()))?;

        let id = Uuid::new_v4();
        let buffer = Arc::new(LineBuffer::with_default_capacity());
        let process = Arc::new(BackgroundProcess {
            id,
            session_id,
            command: command.clone(),
            args: args.clone(),
            pid,
            pgid: pid as i32,
            name: opts.name.clone(),
            status: RwLock::new(ProcessStatus::Starting),
            start_time: Utc::now(),
            end_time: RwLock::new(None),
            exit_code: RwLock::new(None),
            buffer: Arc::clone(&buffer),
            last_sample: RwLock::new(None),
            sample_history: RwLock::new(Vec::new()),
            sample_count: AtomicU32::new(0),
        });

        {
            let mut table = self.table.write().await;
            table.processes.insert(id, Arc::clone(&process));
        }
        *process.status.write().await = ProcessStatus::Running;
        self.persist(&process, ProcessStatus::Running, None, None).await;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        spawn_drain(Arc::clone(&buffer), stdout, Stream::Stdout);
        spawn_drain(Arc::clone(&buffer), stderr, Stream::Stderr);
        crate::buffer::spawn_sweeper(Arc::clone(&buffer));

        let persistence = Arc::clone(&self.persistence);
        let process_for_wait = Arc::clone(&process);
        tokio::spawn(async move {
            let status = child.wait().await;
            let (final_status, exit_code) = match status {
                Ok(status) if status.success() => (ProcessStatus::Stopped, status.code()),
                Ok(status) => (ProcessStatus::Failed, status.code()),
                Err(_) => (ProcessStatus::Failed, None),
            };
            *process_for_wait.status.write().await = final_status;
            *process_for_wait.exit_code.write().await = exit_code;
            *process_for_wait.end_time.write().await = Some(Utc::now());

            let record = process_for_wait.to_persisted(final_status, Some(Utc::now()), exit_code);
            let _ = persistence.save_process(&record).await;
        });

        Ok(process.summary().await)
    }

    async fn persist(
        &self,
        process: &BackgroundProcess,
        status: ProcessStatus,
        end_time: Option<DateTime<Utc>>,
        exit_code: Option<i32>,
    ) {
        let record = process.to_persisted(status, end_time, exit_code);
        let _ = self.persistence.save_process(&record).await;
    }

    pub async fn get(&self, id: Uuid) -> Result<Arc<BackgroundProcess>> {
        let table = self.table.read().await;
        table
            .processes
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no process '{id}'")))
    }

    pub async fn list(&self, session_id: Option<Uuid>, include_orphaned: bool) -> Vec<ProcessSummary> {
        let table = self.table.read().await;
        let mut out = Vec::new();
        for process in table.processes.values() {
            if let Some(sid) = session_id {
                if process.session_id != sid {
                    continue;
                }
            }
            let status = *process.status.read().await;
            if status == ProcessStatus::Orphaned && !include_orphaned {
                continue;
            }
            out.push(process.summary().await);
        }
        out
    }

    /// Send a signal to a process. RUNNING accepts graceful/force; ORPHANED
    /// is signalled directly and marked KILLED; terminal states fail.
    pub async fn kill(&self, id: Uuid, signal: KillSignal) -> Result<ProcessSummary> {
        let process = self.get(id).await?;
        let status = *process.status.read().await;

        if status.is_terminal() {
            return Err(Error::Conflict(format!("process '{id}' is already terminal")));
        }

        let sig = match signal {
            KillSignal::Graceful => nix::sys::signal::Signal::SIGTERM,
            KillSignal::Force => nix::sys::signal::Signal::SIGKILL,
        };

        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(-process.pgid), sig);

        if status == ProcessStatus::Orphaned {
            *process.status.write().await = ProcessStatus::Killed;
            *process.end_time.write().await = Some(Utc::now());
            self.persist(&process, ProcessStatus::Killed, Some(Utc::now()), None).await;
        }
        // RUNNING: the wait() task observes the exit and transitions status
        // itself; we don't force KILLED here so the real exit code, if any,
        // still gets recorded.

        Ok(process.summary().await)
    }

    /// Kill every non-terminal process owned by `session_id`. Used when a
    /// session is deleted, so it doesn't leak background children. Best
    /// effort: a process that fails to signal is skipped, not an error.
    pub async fn kill_all_in_session(&self, session_id: Uuid) -> Vec<Uuid> {
        let owned: Vec<Arc<BackgroundProcess>> = {
            let table = self.table.read().await;
            table
                .processes
                .values()
                .filter(|p| p.session_id == session_id)
                .cloned()
                .collect()
        };

        let mut killed = Vec::new();
        for process in &owned {
            if process.status.read().await.is_terminal() {
                continue;
            }
            if self.kill(process.id, KillSignal::Force).await.is_ok() {
                killed.push(process.id);
            }
        }
        killed
    }

    /// List, kill, or produce an advisory for ORPHANED processes.
    pub async fn cleanup_orphans(&self, mode: CleanupMode, force: bool) -> CleanupReport {
        let orphaned: Vec<Arc<BackgroundProcess>> = {
            let table = self.table.read().await;
            let mut out = Vec::new();
            for process in table.processes.values() {
                if *process.status.read().await == ProcessStatus::Orphaned {
                    out.push(Arc::clone(process));
                }
            }
            out
        };

        let mut killed = Vec::new();
        if matches!(mode, CleanupMode::Kill) {
            let sig = if force {
                nix::sys::signal::Signal::SIGKILL
            } else {
                nix::sys::signal::Signal::SIGTERM
            };
            for process in &orphaned {
                if nix::sys::signal::kill(nix::unistd::Pid::from_raw(-process.pgid), sig).is_ok() {
                    *process.status.write().await = ProcessStatus::Killed;
                    *process.end_time.write().await = Some(Utc::now());
                    self.persist(process, ProcessStatus::Killed, Some(Utc::now()), None).await;
                    killed.push(process.id);
                }
            }
        }

        let mut summaries = Vec::new();
        for process in &orphaned {
            summaries.push(process.summary().await);
        }

        let mode_name = match mode {
            CleanupMode::List => "list",
            CleanupMode::Kill => "kill",
            CleanupMode::Interactive => "interactive",
        };

        CleanupReport {
            mode: mode_name,
            processes: summaries,
            killed,
        }
    }

    /// Match `pattern` (text or regex) against each live process's
    /// command-line string (command + space-joined args).
    pub async fn kill_all_matching(
        &self,
        pattern: &str,
        kind: PatternKind,
        signal: KillSignal,
        dry_run: bool,
    ) -> Result<KillAllResult> {
        let opts = MatchOptions {
            kind,
            case_sensitive: true,
            invert_match: false,
        };

        let candidates: Vec<Arc<BackgroundProcess>> = {
            let table = self.table.read().await;
            table.processes.values().cloned().collect()
        };

        let mut matched = Vec::new();
        for process in &candidates {
            let status = *process.status.read().await;
            if status.is_terminal() {
                continue;
            }
            let line = full_command_line(&process.command, &process.args);
            if search::match_line(&self.pattern_cache, &line, pattern, &opts)?.is_some() {
                matched.push(Arc::clone(process));
            }
        }

        let mut killed = Vec::new();
        if !dry_run {
            for process in &matched {
                if self.kill(process.id, signal).await.is_ok() {
                    killed.push(process.id);
                }
            }
        }

        Ok(KillAllResult {
            matched: matched.iter().map(|p| p.id).collect(),
            killed,
            dry_run,
        })
    }

    /// Combine `LineBuffer::read` with pattern search and optional context
    /// expansion.
    pub async fn get_output(
        &self,
        id: Uuid,
        limit: Option<usize>,
        after_line: Option<u64>,
        search_pattern: Option<(&str, PatternKind, bool, bool)>,
        context_lines: Option<usize>,
    ) -> Result<Vec<crate::buffer::OutputLine>> {
        let process = self.get(id).await?;
        let lines = process.buffer.read(limit, after_line);

        let Some((pattern, kind, case_sensitive, invert)) = search_pattern else {
            return Ok(lines);
        };

        let contents: Vec<String> = lines.iter().map(|l| l.content.clone()).collect();
        let opts = MatchOptions {
            kind,
            case_sensitive,
            invert_match: invert,
        };

        if let Some(context) = context_lines {
            let matches = search::match_with_context(&self.pattern_cache, &contents, pattern, &opts, context)?;
            let indices: std::collections::HashSet<usize> = matches.iter().map(|m| m.line_index).collect();
            return Ok(lines
                .into_iter()
                .enumerate()
                .filter(|(i, _)| indices.contains(i))
                .map(|(_, l)| l)
                .collect());
        }

        let matches = search::match_many(&self.pattern_cache, &contents, pattern, &opts, None)?;
        let indices: std::collections::HashSet<usize> = matches.iter().map(|(i, _)| *i).collect();
        Ok(lines
            .into_iter()
            .enumerate()
            .filter(|(i, _)| indices.contains(i))
            .map(|(_, l)| l)
            .collect())
    }

    /// Thin wrapper over `LineBuffer::wait_for_new`.
    pub async fn stream_output(
        &self,
        id: Uuid,
        after_line: u64,
        timeout: Duration,
        max_lines: Option<usize>,
    ) -> Result<(Vec<crate::buffer::OutputLine>, u64)> {
        let process = self.get(id).await?;
        let mut lines = process.buffer.wait_for_new(after_line, timeout).await?;
        if let Some(max) = max_lines {
            lines.truncate(max);
        }
        let last_line = lines.last().map_or(after_line, |l| l.line_number);
        Ok((lines, last_line))
    }

    /// Write a process's buffered output to `path`, atomically.
    pub async fn save_output(
        &self,
        id: Uuid,
        path: &std::path::Path,
        format: SaveFormat,
        include_metadata: bool,
    ) -> Result<()> {
        let process = self.get(id).await?;
        let lines = process.buffer.read(None, None);

        let body = match format {
            SaveFormat::Text => {
                let mut out = String::new();
                for line in &lines {
                    let tag = match line.stream {
                        Stream::Stdout => "OUT",
                        Stream::Stderr => "ERR",
                    };
                    out.push_str(&format!("[{}] [{}] {}\n", line.line_number, tag, line.content));
                }
                out
            }
            SaveFormat::Json => {
                let summary = process.summary().await;
                let payload = if include_metadata {
                    serde_json::json!({ "process": summary, "output": lines })
                } else {
                    serde_json::json!({ "output": lines })
                };
                serde_json::to_string_pretty(&payload)
                    .map_err(|e| Error::Io(format!("serialize output: {e}")))?
            }
        };

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, body.as_bytes())
            .await
            .map_err(|e| Error::Io(format!("write output file: {e}")))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::Io(format!("rename output file: {e}")))?;
        Ok(())
    }

    /// Periodically sample CPU/RSS for every RUNNING process. Never blocks
    /// other supervisor operations -- runs on its own task, touching the
    /// shared table only briefly per tick.
    pub async fn run_sampler(self: Arc<Self>) {
        let mut sys = sysinfo::System::new();
        let mut interval = config::sample_interval_min_seconds();
        loop {
            tokio::time::sleep(Duration::from_secs(interval)).await;
            sys.refresh_cpu_usage();
            sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

            let running: Vec<Arc<BackgroundProcess>> = {
                let table = self.table.read().await;
                let mut out = Vec::new();
                for process in table.processes.values() {
                    if *process.status.read().await == ProcessStatus::Running {
                        out.push(Arc::clone(process));
                    }
                }
                out
            };

            for process in &running {
                if let Some(sys_process) = sys.process(sysinfo::Pid::from_u32(process.pid)) {
                    let cpu = sys_process.cpu_usage();
                    let rss = sys_process.memory();
                    let total_mem = sys.total_memory().max(1);
                    let mem_pct = (rss as f64 / total_mem as f64 * 100.0) as f32;

                    *process.last_sample.write().await = Some(ResourceSample {
                        cpu_percent: cpu,
                        rss_bytes: rss,
                        memory_percent: mem_pct,
                        sampled_at: Utc::now(),
                    });
                    process.sample_count.fetch_add(1, Ordering::Relaxed);

                    let mut history = process.sample_history.write().await;
                    history.push(cpu);
                    if history.len() > 5 {
                        history.remove(0);
                    }
                }
            }

            let global_load = sys.global_cpu_usage();
            interval = if global_load < 20.0 {
                config::sample_interval_max_seconds()
            } else {
                config::sample_interval_min_seconds()
            };
        }
    }

    /// Periodically drop terminal process records that have lingered past
    /// the grace window.
    pub async fn run_grace_reaper(self: Arc<Self>) {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let grace = Duration::from_secs(config::terminal_grace_seconds());
            let now = Utc::now();

            let mut to_remove = Vec::new();
            {
                let table = self.table.read().await;
                for process in table.processes.values() {
                    let status = *process.status.read().await;
                    if !status.is_terminal() {
                        continue;
                    }
                    if let Some(end_time) = *process.end_time.read().await {
                        let age = now.signed_duration_since(end_time);
                        if age.to_std().unwrap_or_default() > grace {
                            to_remove.push(process.id);
                        }
                    }
                }
            }

            if !to_remove.is_empty() {
                let mut table = self.table.write().await;
                for id in to_remove {
                    table.processes.remove(&id);
                }
            }
        }
    }

    /// Release every buffer's waiters. Used on shutdown.
    pub async fn cleanup_all(&self) {
        let table = self.table.read().await;
        for process in table.processes.values() {
            process.buffer.cleanup();
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SaveFormat {
    Text,
    Json,
}

fn spawn_drain(
    buffer: Arc<LineBuffer>,
    reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    stream: Stream,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    let content = String::from_utf8_lossy(&line).to_string();
                    buffer.append(stream, content);
                }
                Err(_) => break,
            }
        }
    });
}

fn full_command_line(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{command} {}", args.join(" "))
    }
}

fn pid_is_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

fn pid_is_descendant(pid: u32, my_pid: u32) -> bool {
    let stat_path = format!("/proc/{pid}/stat");
    let Ok(contents) = std::fs::read_to_string(stat_path) else {
        return false;
    };
    // Format: pid (comm) state ppid ...; comm may contain spaces/parens, so
    // parse from the last ')'.
    let Some(after_comm) = contents.rfind(')') else {
        return false;
    };
    let rest = &contents[after_comm + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let Some(ppid_str) = fields.get(1) else {
        return false;
    };
    ppid_str.parse::<u32>().map(|ppid| ppid == my_pid).unwrap_or(false)
}
