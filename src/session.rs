//! Low-level local PTY primitives, reused by `interactive.rs`'s local
//! backend.
//!
//! This used to own a full marker-delimited command/response protocol for
//! synchronous exec-in-PTY use; that protocol doesn't fit the free-form
//! interactive sessions this crate's tool surface exposes (see
//! `interactive.rs`), so only the spawn/raw-I/O/resize/is_alive primitives
//! survive here.

use crate::process;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

/// A bash process attached to a pseudo-terminal. Child processes see
/// `isatty()=true`, so colored output and interactive programs behave as
/// they would in a real terminal.
pub struct LocalPty {
    child: tokio::process::Child,
    writer: pty_process::OwnedWritePty,
    reader: BufReader<pty_process::OwnedReadPty>,
}

impl LocalPty {
    /// Spawn a new PTY-backed bash process.
    pub async fn spawn(working_directory: Option<&str>, env: Option<&[(String, String)]>) -> Result<Self, String> {
        let (pty, pts) = pty_process::open().map_err(|e| format!("failed to open PTY: {e}"))?;
        pty.resize(pty_process::Size::new(24, 250))
            .map_err(|e| format!("failed to resize PTY: {e}"))?;

        let mut cmd = pty_process::Command::new("/bin/bash").arg("--norc").arg("--noprofile");

        if let Some(env) = env {
            cmd = cmd.env_clear();
            for (k, v) in env {
                if !process::is_sensitive_env(k) {
                    cmd = cmd.env(k, v);
                }
            }
        } else {
            for (key, _) in std::env::vars() {
                if process::is_sensitive_env(&key) {
                    cmd = cmd.env_remove(&key);
                }
            }
        }

        if let Some(dir) = working_directory {
            cmd = cmd.current_dir(dir);
        }

        let child = cmd.spawn(pts).map_err(|e| format!("failed to spawn bash with PTY: {e}"))?;
        let (read_pty, write_pty) = pty.into_split();

        Ok(Self {
            child,
            writer: write_pty,
            reader: BufReader::new(read_pty),
        })
    }

    /// Write raw bytes to the PTY (the child's stdin).
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| format!("failed to write to PTY: {e}"))?;
        self.writer.flush().await.map_err(|e| format!("failed to flush PTY: {e}"))
    }

    /// Read whatever is available within `timeout`, or an empty vec on
    /// timeout/EOF.
    pub async fn read_chunk(&mut self, timeout: Duration) -> Vec<u8> {
        let mut buf = [0u8; 4096];
        match tokio::time::timeout(timeout, self.reader.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => Vec::new(),
            Ok(Ok(n)) => buf[..n].to_vec(),
        }
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), String> {
        self.child
            .pty()
            .resize(pty_process::Size::new(rows, cols))
            .map_err(|e| format!("failed to resize PTY: {e}"))
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask bash to exit, then wait briefly before force-killing.
    pub async fn close(mut self) {
        let _ = self.write(b"exit\n").await;
        let LocalPty { mut child, writer, reader } = self;
        drop(writer);
        drop(reader);
        if tokio::time::timeout(Duration::from_secs(2), child.wait()).await.is_err() {
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
        }
    }
}

/// Process escape sequences in input text so callers can send control
/// characters. MCP tool parameters arrive as literal strings -- `\n` is two
/// characters (backslash + n), not a newline byte.
#[must_use]
pub fn process_escapes(input: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push(b'\n'),
                Some('r') => out.push(b'\r'),
                Some('t') => out.push(b'\t'),
                Some('\\') => out.push(b'\\'),
                Some('x') => {
                    let mut hex = String::new();
                    if let Some(h1) = chars.next() {
                        hex.push(h1);
                    }
                    if let Some(h2) = chars.next() {
                        hex.push(h2);
                    }
                    if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                        out.push(byte);
                    }
                }
                Some(other) => {
                    out.push(b'\\');
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                }
                None => out.push(b'\\'),
            }
        } else {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    out
}

/// Translate a short control-character name (`"C"`, `"D"`, ...) to its byte,
/// as used by `ssh_interactive_control`/local control input.
#[must_use]
pub fn control_char(name: &str) -> Option<u8> {
    let upper = name.to_uppercase();
    let letter = upper.chars().next()?;
    if upper.len() == 1 && letter.is_ascii_uppercase() {
        Some(letter as u8 - b'A' + 1)
    } else {
        None
    }
}
