//! Bounded line buffer (C1): a FIFO ring of output lines with blocking
//! "lines after N" readers.
//!
//! The wakeup mechanism is grounded in the `Notify`-based ring buffer pattern
//! used for session output elsewhere in the ecosystem (a plain `VecDeque` +
//! `tokio::sync::Notify`), generalized here into explicit [`Waiter`] records
//! so the bounded-waiter-count and per-waiter-deadline semantics are first
//! class rather than implicit in how callers use `Notify`.

use crate::config;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Which stream produced a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// A single committed line in a [`LineBuffer`].
#[derive(Debug, Clone, Serialize)]
pub struct OutputLine {
    pub line_number: u64,
    pub stream: Stream,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

struct WaiterDeadline {
    id: u64,
    deadline: Instant,
}

struct Inner {
    lines: VecDeque<OutputLine>,
    capacity: usize,
    total_lines: u64,
    waiters: Vec<WaiterDeadline>,
}

/// Bounded FIFO ring of `OutputLine`s supporting blocking "wait for new
/// lines" readers. See spec §4.1.
pub struct LineBuffer {
    inner: Mutex<Inner>,
    notify: Notify,
    next_waiter_id: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

impl LineBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                lines: VecDeque::with_capacity(capacity.min(256)),
                capacity,
                total_lines: 0,
                waiters: Vec::new(),
            }),
            notify: Notify::new(),
            next_waiter_id: AtomicU64::new(1),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(config::buffer_capacity())
    }

    /// Append a line, assigning the next monotonic line number, evicting the
    /// oldest entry if over capacity, and waking all waiters.
    pub fn append(&self, stream: Stream, content: String) -> u64 {
        let line_number = {
            let mut inner = self.inner.lock();
            inner.total_lines += 1;
            let line_number = inner.total_lines;
            if inner.lines.len() >= inner.capacity {
                inner.lines.pop_front();
            }
            inner.lines.push_back(OutputLine {
                line_number,
                stream,
                timestamp: Utc::now(),
                content,
            });
            line_number
        };
        // Wake after the line is visible, never before.
        self.notify.notify_waiters();
        line_number
    }

    /// Total lines ever assigned (monotonic, independent of eviction).
    #[must_use]
    pub fn total_lines(&self) -> u64 {
        self.inner.lock().total_lines
    }

    /// Snapshot read: lines with `line_number > after_line`, optionally
    /// capped to the most recent `limit` of them. Never blocks.
    #[must_use]
    pub fn read(&self, limit: Option<usize>, after_line: Option<u64>) -> Vec<OutputLine> {
        let after = after_line.unwrap_or(0);
        let inner = self.inner.lock();
        let mut matching: Vec<OutputLine> = inner
            .lines
            .iter()
            .filter(|l| l.line_number > after)
            .cloned()
            .collect();
        if let Some(limit) = limit {
            if matching.len() > limit {
                let start = matching.len() - limit;
                matching = matching.split_off(start);
            }
        }
        matching
    }

    /// Block until `total_lines() > after_line` or `timeout` elapses,
    /// returning the new lines (empty on timeout). Registers a `Waiter` for
    /// the duration of the wait; enforces `MAX_WAITERS` with forced reaping
    /// of stale waiters before failing.
    pub async fn wait_for_new(&self, after_line: u64, timeout: Duration) -> Result<Vec<OutputLine>> {
        let timeout = timeout.min(Duration::from_secs(config::max_wait_seconds()));

        if self.total_lines() > after_line {
            return Ok(self.read(None, Some(after_line)));
        }
        if timeout.is_zero() || self.closed.load(Ordering::Acquire) {
            return Ok(Vec::new());
        }

        let waiter_id = self.register_waiter(timeout)?;
        let deadline = Instant::now() + timeout;

        loop {
            if self.total_lines() > after_line {
                self.remove_waiter(waiter_id);
                return Ok(self.read(None, Some(after_line)));
            }
            if self.closed.load(Ordering::Acquire) {
                self.remove_waiter(waiter_id);
                return Ok(Vec::new());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.remove_waiter(waiter_id);
                return Ok(Vec::new());
            }
            let notified = self.notify.notified();
            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(remaining) => {
                    self.remove_waiter(waiter_id);
                    return Ok(Vec::new());
                }
            }
        }
    }

    fn register_waiter(&self, timeout: Duration) -> Result<u64> {
        let mut inner = self.inner.lock();
        if inner.waiters.len() >= config::max_waiters() {
            let now = Instant::now();
            inner.waiters.retain(|w| w.deadline > now);
            if inner.waiters.len() >= config::max_waiters() {
                return Err(Error::ResourceExceeded(
                    "too many waiters registered on this buffer".to_string(),
                ));
            }
        }
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        inner.waiters.push(WaiterDeadline {
            id,
            deadline: Instant::now() + timeout,
        });
        Ok(id)
    }

    fn remove_waiter(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.waiters.retain(|w| w.id != id);
    }

    /// Periodic maintenance: reap any waiter whose deadline has passed.
    /// Stale waiters are only bookkeeping entries here (the actual async
    /// wait already races its own timeout), so reaping just trims the count
    /// so `register_waiter` doesn't spuriously see phantom pressure.
    pub fn reap_stale_waiters(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.waiters.retain(|w| w.deadline > now);
    }

    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Cancel all pending waiters (delivering them an empty sequence) and
    /// mark the buffer closed so any future `wait_for_new` call returns
    /// immediately instead of registering a new waiter. Used on shutdown and
    /// on explicit session/process teardown.
    pub fn cleanup(&self) {
        self.closed.store(true, Ordering::Release);
        {
            let mut inner = self.inner.lock();
            inner.waiters.clear();
        }
        self.notify.notify_waiters();
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Spawn a background task that periodically reaps stale waiters on `buf`
/// until the returned handle is dropped/aborted. Mirrors spec §4.1's "every
/// 30s" maintenance sweep.
pub fn spawn_sweeper(buf: Arc<LineBuffer>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(config::waiter_sweep_interval_seconds());
        loop {
            tokio::time::sleep(interval).await;
            buf.reap_stale_waiters();
        }
    })
}
