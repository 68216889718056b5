//! Session store (C4): named sessions with working-directory/environment/
//! history, durable on disk via a debounced save.

use crate::config;
use crate::debounce::Debouncer;
use crate::error::{Error, Result};
use crate::persistence::Persistence;
use crate::search;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// The name of the one session that always exists and cannot be deleted.
pub const DEFAULT_SESSION_NAME: &str = "default";

/// A single recorded command execution, bounded per-session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandHistoryEntry {
    pub command: String,
    pub args: Vec<String>,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub start_time: DateTime<Utc>,
    pub duration_ms: u64,
}

/// A named, persistent session: working directory, environment, and bounded
/// command history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub cwd: String,
    /// Ordered mapping, name -> value; names are unique (case-sensitive on
    /// non-Windows).
    pub env: Vec<(String, String)>,
    pub created: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub history: VecDeque<CommandHistoryEntry>,
}

impl Session {
    fn new(name: String, cwd: String, env: Vec<(String, String)>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            cwd,
            env,
            created: now,
            last_used: now,
            history: VecDeque::new(),
        }
    }

    /// Env as an ordered map, for spawning children.
    #[must_use]
    pub fn env_map(&self) -> Vec<(String, String)> {
        self.env.clone()
    }
}

/// A patch applied via `SessionStore::update`.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub cwd: Option<String>,
    pub env: Option<Vec<(String, String)>>,
}

struct Inner {
    by_id: HashMap<Uuid, Session>,
    name_to_id: HashMap<String, Uuid>,
}

/// In-memory map of named sessions, durable via a debounced persistence
/// layer. Reads may be concurrent; mutations take the single writer lock.
pub struct SessionStore {
    inner: RwLock<Inner>,
    persistence: Arc<Persistence>,
    saver: Debouncer<Uuid, Session>,
}

impl SessionStore {
    /// Construct an empty store. Call [`SessionStore::load_and_init`] before
    /// first use to recover persisted sessions and guarantee the default
    /// session exists.
    #[must_use]
    pub fn new(persistence: Arc<Persistence>) -> Self {
        let persistence_for_saver = Arc::clone(&persistence);
        let saver = Debouncer::new(Duration::from_millis(500), move |_id, session: Session| {
            let persistence = Arc::clone(&persistence_for_saver);
            async move { persistence.save_session(&truncate_history(&session)).await.map_err(Into::into) }
        });

        Self {
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                name_to_id: HashMap::new(),
            }),
            persistence,
            saver,
        }
    }

    /// Load persisted sessions from disk and ensure the default session
    /// exists, creating it (with the current process environment) if not.
    pub async fn load_and_init(&self) {
        let sessions = self.persistence.load_all_sessions().await;
        {
            let mut inner = self.inner.write().await;
            for session in sessions {
                inner.name_to_id.insert(session.name.clone(), session.id);
                inner.by_id.insert(session.id, session);
            }
        }

        let has_default = {
            let inner = self.inner.read().await;
            inner.name_to_id.contains_key(DEFAULT_SESSION_NAME)
        };
        if !has_default {
            let env: Vec<(String, String)> = std::env::vars().collect();
            let cwd = std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "/".to_string());
            let _ = self
                .create(DEFAULT_SESSION_NAME.to_string(), Some(cwd), Some(env))
                .await;
        }
    }

    /// Create a new session. Fails with `Conflict` if the name already
    /// exists.
    pub async fn create(
        &self,
        name: String,
        cwd: Option<String>,
        env: Option<Vec<(String, String)>>,
    ) -> Result<Session> {
        let mut inner = self.inner.write().await;
        if inner.name_to_id.contains_key(&name) {
            return Err(Error::Conflict(format!("session '{name}' already exists")));
        }

        if inner.by_id.len() >= config::max_sessions() {
            return Err(Error::ResourceExceeded(format!(
                "too many sessions ({}/{})",
                inner.by_id.len(),
                config::max_sessions()
            )));
        }

        let cwd = cwd.unwrap_or_else(|| {
            std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "/".to_string())
        });
        let env = env.unwrap_or_else(|| std::env::vars().collect());

        let session = Session::new(name.clone(), cwd, env);
        inner.name_to_id.insert(name, session.id);
        inner.by_id.insert(session.id, session.clone());
        drop(inner);

        self.saver.schedule(session.id, session.clone()).await;
        Ok(session)
    }

    /// Resolve by id first, then by name.
    pub async fn get(&self, name_or_id: &str) -> Result<Session> {
        let inner = self.inner.read().await;
        if let Ok(id) = Uuid::parse_str(name_or_id) {
            if let Some(session) = inner.by_id.get(&id) {
                return Ok(session.clone());
            }
        }
        if let Some(id) = inner.name_to_id.get(name_or_id) {
            if let Some(session) = inner.by_id.get(id) {
                return Ok(session.clone());
            }
        }
        Err(Error::NotFound(format!("no session '{name_or_id}'")))
    }

    /// Merge `patch` into the session, refresh `last_used`, and schedule
    /// persistence.
    pub async fn update(&self, name_or_id: &str, patch: SessionPatch) -> Result<Session> {
        let mut inner = self.inner.write().await;
        let id = resolve_id(&inner, name_or_id)?;
        let session = inner
            .by_id
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("no session '{name_or_id}'")))?;

        if let Some(cwd) = patch.cwd {
            session.cwd = cwd;
        }
        if let Some(env) = patch.env {
            session.env = env;
        }
        session.last_used = Utc::now();
        let updated = session.clone();
        drop(inner);

        self.saver.schedule(id, updated.clone()).await;
        Ok(updated)
    }

    /// Touch `last_used` without changing anything else.
    pub async fn touch(&self, name_or_id: &str) -> Result<()> {
        self.update(name_or_id, SessionPatch::default()).await?;
        Ok(())
    }

    /// Delete a session. Refuses to delete the default session.
    pub async fn delete(&self, name_or_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let id = resolve_id(&inner, name_or_id)?;
        let name = inner
            .by_id
            .get(&id)
            .map(|s| s.name.clone())
            .ok_or_else(|| Error::NotFound(format!("no session '{name_or_id}'")))?;

        if name == DEFAULT_SESSION_NAME {
            return Err(Error::Conflict("cannot delete the default session".to_string()));
        }

        inner.by_id.remove(&id);
        inner.name_to_id.remove(&name);
        drop(inner);

        self.saver.cancel(Some(id)).await;
        self.persistence.delete_session(&id).await?;
        Ok(())
    }

    pub async fn list_sessions(&self) -> Vec<Session> {
        let inner = self.inner.read().await;
        inner.by_id.values().cloned().collect()
    }

    /// Append a history entry, enforcing the in-memory cap (most-recent-K).
    pub async fn append_history(&self, name_or_id: &str, entry: CommandHistoryEntry) -> Result<()> {
        let mut inner = self.inner.write().await;
        let id = resolve_id(&inner, name_or_id)?;
        let session = inner
            .by_id
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("no session '{name_or_id}'")))?;

        session.history.push_back(entry);
        while session.history.len() > config::max_history_memory() {
            session.history.pop_front();
        }
        session.last_used = Utc::now();
        let updated = session.clone();
        drop(inner);

        self.saver.schedule(id, updated).await;
        Ok(())
    }

    pub async fn history(&self, name_or_id: &str, limit: Option<usize>) -> Result<Vec<CommandHistoryEntry>> {
        let session = self.get(name_or_id).await?;
        let mut entries: Vec<CommandHistoryEntry> = session.history.into_iter().collect();
        if let Some(limit) = limit {
            if entries.len() > limit {
                entries = entries.split_off(entries.len() - limit);
            }
        }
        Ok(entries)
    }

    /// Search history entries' command/stdout/stderr text against `pattern`
    /// (text search), returning matching entries.
    pub async fn search_history(&self, name_or_id: &str, pattern: &str) -> Result<Vec<CommandHistoryEntry>> {
        let session = self.get(name_or_id).await?;
        let opts = search::MatchOptions::default();
        let mut out = Vec::new();
        for entry in session.history {
            let haystacks = [
                entry.command.as_str(),
                entry.stdout.as_deref().unwrap_or(""),
                entry.stderr.as_deref().unwrap_or(""),
            ];
            if haystacks
                .iter()
                .any(|h| search::text_match(h, pattern, &opts).is_some())
            {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Flush all pending debounced saves. Used on shutdown.
    pub async fn flush_all(&self) {
        self.saver.flush(None).await;
    }
}

fn resolve_id(inner: &Inner, name_or_id: &str) -> Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(name_or_id) {
        if inner.by_id.contains_key(&id) {
            return Ok(id);
        }
    }
    inner
        .name_to_id
        .get(name_or_id)
        .copied()
        .ok_or_else(|| Error::NotFound(format!("no session '{name_or_id}'")))
}

fn truncate_history(session: &Session) -> Session {
    let mut s = session.clone();
    while s.history.len() > config::max_history_persist() {
        s.history.pop_front();
    }
    s
}
