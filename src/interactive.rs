//! Interactive PTY session manager (C9): SSH and local PTY-backed sessions
//! sharing the C1 line-buffer/waiter protocol.
//!
//! Local sessions reuse `session.rs`'s low-level PTY plumbing, generalized
//! with a connection state machine. SSH sessions are a new code path built
//! on `ssh2` (a blocking library); its connect+shell+read/write loop runs on
//! a `spawn_blocking` task, the same way the teacher isolates blocking
//! syscalls from the async runtime.

use crate::buffer::{LineBuffer, OutputLine, Stream as BufStream};
use crate::config;
use crate::error::{Error, Result};
use crate::output;
use crate::session::{control_char, process_escapes, LocalPty};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Connection lifecycle of an `InteractivePtySession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PtyStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// What backs the PTY: a local bash process, or a remote shell over SSH.
enum Backend {
    Local(RwLock<Option<LocalPty>>),
    Ssh {
        input: mpsc::UnboundedSender<Vec<u8>>,
        resize: mpsc::UnboundedSender<(u16, u16)>,
        closed: Arc<AtomicBool>,
    },
}

/// A PTY-backed interactive session: one local bash process, or one SSH
/// connection, plus the buffered output and connection state shared by
/// both backends.
pub struct InteractivePtySession {
    pub id: Uuid,
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub started_at: DateTime<Utc>,
    status: RwLock<PtyStatus>,
    last_activity: RwLock<DateTime<Utc>>,
    buffer: Arc<LineBuffer>,
    backend: Backend,
    partial_line: RwLock<String>,
}

/// Metadata returned by `list_sessions` — never includes credentials.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    pub id: Uuid,
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub status: PtyStatus,
    pub started_at: DateTime<Utc>,
    pub total_lines: u64,
    pub last_activity: DateTime<Utc>,
}

impl InteractivePtySession {
    async fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            id: self.id,
            host: self.host.clone(),
            user: self.user.clone(),
            port: self.port,
            status: *self.status.read().await,
            started_at: self.started_at,
            total_lines: self.buffer.total_lines(),
            last_activity: *self.last_activity.read().await,
        }
    }

    async fn touch(&self) {
        *self.last_activity.write().await = Utc::now();
    }

    /// Append a raw chunk of PTY output: strip ANSI, split into lines on the
    /// stored clean copy, and push whole lines into the buffer, carrying any
    /// trailing partial line forward until it's completed or the PTY exits.
    async fn ingest(&self, raw: &[u8]) {
        if raw.is_empty() {
            return;
        }
        let clean = output::strip_ansi(&String::from_utf8_lossy(raw));
        let mut partial = self.partial_line.write().await;
        partial.push_str(&clean);

        while let Some(idx) = partial.find('\n') {
            let line: String = partial.drain(..=idx).collect();
            let line = line.trim_end_matches('\n').trim_end_matches('\r').to_string();
            self.buffer.append(BufStream::Stdout, line);
        }
        self.evaluate_connection_state(&partial).await;
    }

    async fn flush_partial(&self) {
        let mut partial = self.partial_line.write().await;
        if !partial.is_empty() {
            self.buffer.append(BufStream::Stdout, std::mem::take(&mut *partial));
        }
    }

    /// Check the tail of buffered output against success/error patterns
    /// while CONNECTING; does nothing once a terminal state is reached.
    async fn evaluate_connection_state(&self, tail: &str) {
        if *self.status.read().await != PtyStatus::Connecting {
            return;
        }
        let recent: String = {
            let lines = self.buffer.read(Some(20), None);
            let mut joined: String = lines.iter().map(|l| l.content.as_str()).collect::<Vec<_>>().join("\n");
            joined.push('\n');
            joined.push_str(tail);
            joined
        };
        if config::PTY_ERROR_PATTERNS.iter().any(|re| re.is_match(&recent)) {
            *self.status.write().await = PtyStatus::Error;
        } else if config::PTY_SUCCESS_PATTERNS.iter().any(|re| re.is_match(&recent)) {
            *self.status.write().await = PtyStatus::Connected;
        }
    }

    async fn wait_for_connected(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match *self.status.read().await {
                PtyStatus::Connected => return Ok(()),
                PtyStatus::Error | PtyStatus::Disconnected => {
                    return Err(Error::ExternalFailure("interactive session failed to connect".to_string()));
                }
                PtyStatus::Connecting => {}
            }
            if tokio::time::Instant::now() >= deadline {
                *self.status.write().await = PtyStatus::Error;
                return Err(Error::Timeout("interactive session did not reach a known state within CONNECT_TIMEOUT".to_string()));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Send literal input, with escape sequences processed and an optional
    /// trailing newline appended.
    async fn send(&self, text: &str, append_newline: bool) -> Result<()> {
        let mut bytes = process_escapes(text);
        if append_newline {
            bytes.push(b'\n');
        }
        self.write_bytes(bytes).await?;
        self.touch().await;
        Ok(())
    }

    /// Send a named control character (`"C"` -> 0x03, etc).
    async fn control(&self, name: &str) -> Result<()> {
        let byte = control_char(name).ok_or_else(|| Error::Invalid(format!("unrecognized control character: {name}")))?;
        self.write_bytes(vec![byte]).await?;
        self.touch().await;
        Ok(())
    }

    async fn write_bytes(&self, bytes: Vec<u8>) -> Result<()> {
        match &self.backend {
            Backend::Local(pty) => {
                let mut guard = pty.write().await;
                let pty = guard.as_mut().ok_or_else(|| Error::Conflict("session is closed".to_string()))?;
                pty.write(&bytes).await.map_err(Error::ExternalFailure)
            }
            Backend::Ssh { input, closed, .. } => {
                if closed.load(Ordering::SeqCst) {
                    return Err(Error::Conflict("session is closed".to_string()));
                }
                input.send(bytes).map_err(|_| Error::Conflict("session is closed".to_string()))
            }
        }
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        match &self.backend {
            Backend::Local(pty) => {
                let guard = pty.read().await;
                let pty = guard.as_ref().ok_or_else(|| Error::Conflict("session is closed".to_string()))?;
                pty.resize(cols, rows).map_err(Error::ExternalFailure)
            }
            Backend::Ssh { resize, closed, .. } => {
                if closed.load(Ordering::SeqCst) {
                    return Err(Error::Conflict("session is closed".to_string()));
                }
                resize.send((cols, rows)).map_err(|_| Error::Conflict("session is closed".to_string()))
            }
        }
    }

    /// Idempotent: closing an already-closed session is a no-op success.
    async fn close(&self) {
        self.flush_partial().await;
        match &self.backend {
            Backend::Local(pty) => {
                let mut guard = pty.write().await;
                if let Some(pty) = guard.take() {
                    pty.close().await;
                }
            }
            Backend::Ssh { closed, .. } => {
                closed.store(true, Ordering::SeqCst);
            }
        }
        *self.status.write().await = PtyStatus::Disconnected;
    }

    pub fn buffer(&self) -> &Arc<LineBuffer> {
        &self.buffer
    }

    pub async fn output(&self, limit: Option<usize>, after_line: Option<u64>) -> Vec<OutputLine> {
        self.buffer.read(limit, after_line)
    }

    pub async fn wait_for_output(&self, after_line: u64, timeout: Duration) -> Result<Vec<OutputLine>> {
        self.buffer.wait_for_new(after_line, timeout).await
    }
}

/// SSH connection parameters. Credentials are consumed once at connect time
/// and never stored on the session itself.
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
}

/// Owns all live interactive sessions.
pub struct InteractiveManager {
    sessions: RwLock<HashMap<Uuid, Arc<InteractivePtySession>>>,
}

impl InteractiveManager {
    #[must_use]
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    async fn enforce_capacity(&self) -> Result<()> {
        if self.sessions.read().await.len() >= config::max_sessions() {
            return Err(Error::ResourceExceeded("too many interactive sessions open".to_string()));
        }
        Ok(())
    }

    async fn insert(&self, session: Arc<InteractivePtySession>) {
        self.sessions.write().await.insert(session.id, session);
    }

    /// Start a local PTY-backed bash session and wait (up to `CONNECT_TIMEOUT`)
    /// for it to reach CONNECTED or ERROR.
    pub async fn start_local(&self, cwd: Option<&str>, env: Option<&[(String, String)]>) -> Result<SessionMetadata> {
        self.enforce_capacity().await?;

        let pty = LocalPty::spawn(cwd, env).await.map_err(Error::ExternalFailure)?;
        let id = Uuid::new_v4();
        let buffer = Arc::new(LineBuffer::with_default_capacity());
        let session = Arc::new(InteractivePtySession {
            id,
            host: None,
            user: None,
            port: None,
            started_at: Utc::now(),
            status: RwLock::new(PtyStatus::Connecting),
            last_activity: RwLock::new(Utc::now()),
            buffer,
            backend: Backend::Local(RwLock::new(Some(pty))),
            partial_line: RwLock::new(String::new()),
        });

        // A freshly spawned bash with no greeting is treated as immediately
        // usable; the prompt it emits on first read still confirms CONNECTED
        // via evaluate_connection_state, but we don't block indefinitely
        // waiting for one if the shell prints nothing before the timeout.
        *session.status.write().await = PtyStatus::Connected;

        self.spawn_local_drain(Arc::clone(&session));
        crate::buffer::spawn_sweeper(Arc::clone(&session.buffer));
        self.insert(Arc::clone(&session)).await;
        Ok(session.metadata().await)
    }

    fn spawn_local_drain(&self, session: Arc<InteractivePtySession>) {
        tokio::spawn(async move {
            loop {
                let chunk = {
                    let mut guard = match &session.backend {
                        Backend::Local(pty) => pty.write().await,
                        Backend::Ssh { .. } => return,
                    };
                    let Some(pty) = guard.as_mut() else { return };
                    if !pty.is_alive() {
                        let chunk = pty.read_chunk(Duration::from_millis(50)).await;
                        if chunk.is_empty() {
                            drop(guard);
                            session.flush_partial().await;
                            *session.status.write().await = PtyStatus::Disconnected;
                            return;
                        }
                        chunk
                    } else {
                        pty.read_chunk(Duration::from_secs(1)).await
                    }
                };
                if !chunk.is_empty() {
                    session.ingest(&chunk).await;
                }
            }
        });
    }

    /// Start an SSH session. Connects and authenticates synchronously on a
    /// blocking task, then hands control to a dedicated read/write loop
    /// until `close` fires or the remote shell exits.
    pub async fn start_ssh(&self, target: SshTarget) -> Result<SessionMetadata> {
        self.enforce_capacity().await?;

        let id = Uuid::new_v4();
        let buffer = Arc::new(LineBuffer::with_default_capacity());
        let (input_tx, input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (resize_tx, resize_rx) = mpsc::unbounded_channel::<(u16, u16)>();
        let closed = Arc::new(AtomicBool::new(false));

        let session = Arc::new(InteractivePtySession {
            id,
            host: Some(target.host.clone()),
            user: Some(target.user.clone()),
            port: Some(target.port),
            started_at: Utc::now(),
            status: RwLock::new(PtyStatus::Connecting),
            last_activity: RwLock::new(Utc::now()),
            buffer,
            backend: Backend::Ssh {
                input: input_tx,
                resize: resize_tx,
                closed: Arc::clone(&closed),
            },
            partial_line: RwLock::new(String::new()),
        });

        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let (output_tx, mut output_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        spawn_ssh_worker(target, input_rx, resize_rx, output_tx, closed, ready_tx);
        crate::buffer::spawn_sweeper(Arc::clone(&session.buffer));

        tokio::spawn({
            let session = Arc::clone(&session);
            async move {
                while let Some(chunk) = output_rx.recv().await {
                    session.ingest(&chunk).await;
                }
                session.flush_partial().await;
                if *session.status.read().await == PtyStatus::Connecting {
                    *session.status.write().await = PtyStatus::Error;
                } else {
                    *session.status.write().await = PtyStatus::Disconnected;
                }
            }
        });

        // Surface a connect-phase failure (auth, DNS, refused) immediately
        // rather than waiting out the full CONNECT_TIMEOUT.
        if let Ok(Ok(Err(reason))) = tokio::time::timeout(Duration::from_millis(100), ready_rx).await {
            *session.status.write().await = PtyStatus::Error;
            self.insert(Arc::clone(&session)).await;
            return Err(Error::ExternalFailure(reason));
        }

        self.insert(Arc::clone(&session)).await;

        let timeout = Duration::from_secs(config::connect_timeout_seconds());
        match session.wait_for_connected(timeout).await {
            Ok(()) => Ok(session.metadata().await),
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Arc<InteractivePtySession>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no interactive session with id {id}")))
    }

    pub async fn send(&self, id: Uuid, text: &str, append_newline: bool) -> Result<()> {
        self.get(id).await?.send(text, append_newline).await
    }

    pub async fn control(&self, id: Uuid, name: &str) -> Result<()> {
        self.get(id).await?.control(name).await
    }

    pub async fn resize(&self, id: Uuid, cols: u16, rows: u16) -> Result<()> {
        self.get(id).await?.resize(cols, rows).await
    }

    pub async fn output(&self, id: Uuid, limit: Option<usize>, after_line: Option<u64>) -> Result<Vec<OutputLine>> {
        Ok(self.get(id).await?.output(limit, after_line).await)
    }

    pub async fn wait(&self, id: Uuid, after_line: u64, timeout: Duration) -> Result<Vec<OutputLine>> {
        self.get(id).await?.wait_for_output(after_line, timeout).await
    }

    pub async fn close(&self, id: Uuid) -> Result<()> {
        let session = self.get(id).await?;
        session.close().await;
        Ok(())
    }

    pub async fn list(&self) -> Vec<SessionMetadata> {
        let sessions = self.sessions.read().await;
        let mut out = Vec::with_capacity(sessions.len());
        for s in sessions.values() {
            out.push(s.metadata().await);
        }
        out
    }

    /// Close every session and drop it. Used on shutdown.
    pub async fn close_all(&self) {
        let sessions = self.sessions.write().await.drain().map(|(_, v)| v).collect::<Vec<_>>();
        for session in sessions {
            session.close().await;
            session.buffer.cleanup();
        }
    }
}

impl Default for InteractiveManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the blocking connect + read/write loop for one SSH session on a
/// dedicated OS thread (via `spawn_blocking`), bridging to the async world
/// through channels.
fn spawn_ssh_worker(
    target: SshTarget,
    mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut resize_rx: mpsc::UnboundedReceiver<(u16, u16)>,
    output_tx: mpsc::UnboundedSender<Vec<u8>>,
    closed: Arc<AtomicBool>,
    ready_tx: tokio::sync::oneshot::Sender<std::result::Result<(), String>>,
) {
    tokio::task::spawn_blocking(move || {
        let connect_result = (|| -> std::result::Result<(ssh2::Session, ssh2::Channel), String> {
            let addr = format!("{}:{}", target.host, target.port);
            let tcp = TcpStream::connect(&addr).map_err(|e| format!("failed to connect to {addr}: {e}"))?;
            tcp.set_read_timeout(Some(Duration::from_millis(200))).ok();

            let mut sess = ssh2::Session::new().map_err(|e| format!("failed to create SSH session: {e}"))?;
            sess.set_tcp_stream(tcp);
            sess.handshake().map_err(|e| format!("SSH handshake failed: {e}"))?;

            if let Some(key_path) = &target.private_key_path {
                sess.userauth_pubkey_file(&target.user, None, std::path::Path::new(key_path), None)
                    .map_err(|e| format!("public key authentication failed: {e}"))?;
            } else if let Some(password) = &target.password {
                sess.userauth_password(&target.user, password)
                    .map_err(|e| format!("password authentication failed: {e}"))?;
            } else {
                return Err("no credentials supplied (password or private_key_path required)".to_string());
            }

            if !sess.authenticated() {
                return Err("authentication failed".to_string());
            }

            let mut channel = sess.channel_session().map_err(|e| format!("failed to open channel: {e}"))?;
            channel
                .request_pty("xterm", None, Some((250, 24, 0, 0)))
                .map_err(|e| format!("failed to request PTY: {e}"))?;
            channel.shell().map_err(|e| format!("failed to start shell: {e}"))?;
            sess.set_blocking(false);
            Ok((sess, channel))
        })();

        let (sess, mut channel) = match connect_result {
            Ok(pair) => {
                let _ = ready_tx.send(Ok(()));
                pair
            }
            Err(reason) => {
                let _ = ready_tx.send(Err(reason));
                return;
            }
        };

        let mut buf = [0u8; 4096];
        loop {
            if closed.load(Ordering::SeqCst) {
                let _ = channel.send_eof();
                break;
            }

            while let Ok(bytes) = input_rx.try_recv() {
                let _ = channel.write_all(&bytes);
                let _ = channel.flush();
            }
            while let Ok((cols, rows)) = resize_rx.try_recv() {
                let _ = channel.request_pty_size(u32::from(cols), u32::from(rows), None, None);
            }

            match channel.read(&mut buf) {
                Ok(0) => {
                    if channel.eof() {
                        break;
                    }
                }
                Ok(n) => {
                    if output_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => break,
            }

            if channel.eof() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        let _ = channel.close();
        drop(sess);
    });
}
