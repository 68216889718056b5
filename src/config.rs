//! Process-local tunable constants, with environment-variable overrides.
//!
//! This is intentionally narrow: it resolves the handful of numeric/string
//! knobs this crate itself owns (buffer capacities, timeouts, TTLs). General
//! layered configuration-file loading for the wider product is an external
//! collaborator (see spec's Non-goals) and is not reimplemented here.

use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Default capacity of a `LineBuffer` (most-recent lines retained).
pub fn buffer_capacity() -> usize {
    env_usize("SHELLSUP_BUFFER_CAPACITY", 10_000)
}

/// Max concurrent waiters registered on a single `LineBuffer`.
pub fn max_waiters() -> usize {
    env_usize("SHELLSUP_MAX_WAITERS", 100)
}

/// Ceiling a `waitForNew` timeout is clamped to, in seconds.
pub fn max_wait_seconds() -> u64 {
    env_u64("SHELLSUP_MAX_WAIT_SECONDS", 60)
}

/// How often the buffer's stale-waiter sweep runs, in seconds.
pub fn waiter_sweep_interval_seconds() -> u64 {
    env_u64("SHELLSUP_WAITER_SWEEP_SECONDS", 30)
}

/// Grace window terminal process records linger for before removal.
pub fn terminal_grace_seconds() -> u64 {
    env_u64("SHELLSUP_TERMINAL_GRACE_SECONDS", 5)
}

/// Default / minimum resource-sampling interval, in seconds.
pub fn sample_interval_min_seconds() -> u64 {
    env_u64("SHELLSUP_SAMPLE_INTERVAL_MIN_SECONDS", 5)
}

/// Sampling interval used once the host is judged to be under low load.
pub fn sample_interval_max_seconds() -> u64 {
    env_u64("SHELLSUP_SAMPLE_INTERVAL_MAX_SECONDS", 30)
}

/// Max in-memory history entries per session.
pub fn max_history_memory() -> usize {
    env_usize("SHELLSUP_MAX_HISTORY_MEMORY", 100)
}

/// Max history entries written to a persisted session file.
pub fn max_history_persist() -> usize {
    env_usize("SHELLSUP_MAX_HISTORY_PERSIST", 1_000)
}

/// Max length of a single output line before a stream is considered binary-ish.
pub fn max_single_line_len() -> usize {
    env_usize("SHELLSUP_MAX_SINGLE_LINE_LEN", 10_000)
}

/// Max pattern length accepted by the pattern searcher.
pub fn max_pattern_len() -> usize {
    env_usize("SHELLSUP_MAX_PATTERN_LEN", 1_000)
}

/// Max complexity score a regex pattern may have before it's rejected.
pub fn max_pattern_complexity() -> u32 {
    env_usize("SHELLSUP_MAX_PATTERN_COMPLEXITY", 100) as u32
}

/// Compiled-pattern cache capacity (C8).
pub fn pattern_cache_capacity() -> usize {
    env_usize("SHELLSUP_PATTERN_CACHE_CAPACITY", 100)
}

/// Request deduplicator TTL, in seconds.
pub fn dedup_ttl_seconds() -> u64 {
    env_u64("SHELLSUP_DEDUP_TTL_SECONDS", 10)
}

/// Request deduplicator cache capacity.
pub fn dedup_max_size() -> usize {
    env_usize("SHELLSUP_DEDUP_MAX_SIZE", 1_000)
}

/// How often the deduplicator's sweep may run, at most, in seconds.
pub fn dedup_sweep_interval_seconds() -> u64 {
    env_u64("SHELLSUP_DEDUP_SWEEP_SECONDS", 60)
}

/// Max concurrent shell sessions (C4 + C9 combined budget, mirrors the
/// teacher's own `MAX_SESSIONS` ceiling).
pub fn max_sessions() -> usize {
    env_usize("SHELLSUP_MAX_SESSIONS", 10)
}

/// Connect timeout for interactive (SSH/local) sessions, in seconds.
pub fn connect_timeout_seconds() -> u64 {
    env_u64("SHELLSUP_CONNECT_TIMEOUT_SECONDS", 10)
}

/// Root directory persisted session/process records live under.
pub fn state_root() -> PathBuf {
    if let Ok(v) = std::env::var("SHELLSUP_STATE_ROOT") {
        return PathBuf::from(v);
    }
    dirs_home().join(".shellsup")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Regex patterns whose presence in interactive output means "connected".
pub static PTY_SUCCESS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"[$#>]\s*$",
        r"(?i)welcome to",
        r"(?i)last login:",
        r"\]\$\s*$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Regex patterns whose presence in interactive output means "failed to connect".
pub static PTY_ERROR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)permission denied",
        r"(?i)authentication failed",
        r"(?i)host key verification failed",
        r"(?i)connection refused",
        r"(?i)could not resolve hostname",
        r"(?i)no route to host",
        r"(?i)connection timed out",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});
