//! Persistence layer (C3): atomic JSON file load/save for sessions and
//! process records under a fixed on-disk tree.
//!
//! Writes go to a temp file in the same directory, are fsync'd, and are
//! renamed over the target -- the standard write-temp-then-rename idiom for
//! atomic file replacement on POSIX filesystems (not attributable to a
//! single pack file; it's a general Rust idiom, applied here in the
//! teacher's plain-`tokio::fs` style rather than pulling in an extra crate).

use crate::error::{Error, Result};
use crate::store::Session;
use crate::supervisor::PersistedProcess;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Root of the on-disk state tree (default `$HOME/.shellsup`).
#[derive(Debug, Clone)]
pub struct Persistence {
    root: PathBuf,
}

impl Persistence {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn processes_dir(&self) -> PathBuf {
        self.root.join("processes")
    }

    async fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.sessions_dir())
            .await
            .map_err(|e| Error::Io(format!("create sessions dir: {e}")))?;
        fs::create_dir_all(self.processes_dir())
            .await
            .map_err(|e| Error::Io(format!("create processes dir: {e}")))?;
        Ok(())
    }

    pub async fn save_session(&self, session: &Session) -> Result<()> {
        self.ensure_dirs().await?;
        let path = self.sessions_dir().join(format!("{}.json", session.id));
        atomic_write_json(&path, session).await
    }

    pub async fn delete_session(&self, id: &uuid::Uuid) -> Result<()> {
        let path = self.sessions_dir().join(format!("{id}.json"));
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!("remove session file: {e}"))),
        }
    }

    pub async fn save_process(&self, proc: &PersistedProcess) -> Result<()> {
        self.ensure_dirs().await?;
        let path = self.processes_dir().join(format!("{}.json", proc.id));
        atomic_write_json(&path, proc).await
    }

    pub async fn delete_process(&self, id: &uuid::Uuid) -> Result<()> {
        let path = self.processes_dir().join(format!("{id}.json"));
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!("remove process file: {e}"))),
        }
    }

    /// Load every session file under the tree. Malformed files are skipped
    /// with a warning rather than aborting the whole load.
    pub async fn load_all_sessions(&self) -> Vec<Session> {
        load_all_json(&self.sessions_dir()).await
    }

    /// Load every process record under the tree (used for orphan detection
    /// on supervisor start).
    pub async fn load_all_processes(&self) -> Vec<PersistedProcess> {
        load_all_json(&self.processes_dir()).await
    }
}

async fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::Io(format!("serialize {}: {e}", path.display())))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("target path has no parent directory".to_string()))?;
    let tmp_name = format!(
        ".{}.tmp-{:x}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        rand::random::<u64>()
    );
    let tmp_path = dir.join(tmp_name);

    let mut file = fs::File::create(&tmp_path)
        .await
        .map_err(|e| Error::Io(format!("create temp file: {e}")))?;
    use tokio::io::AsyncWriteExt;
    file.write_all(&json)
        .await
        .map_err(|e| Error::Io(format!("write temp file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Io(format!("fsync temp file: {e}")))?;
    drop(file);

    fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("rename into place: {e}")))?;
    Ok(())
}

async fn load_all_json<T: DeserializeOwned>(dir: &Path) -> Vec<T> {
    let mut out = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(e) => e,
        Err(_) => return out,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => out.push(value),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed state file");
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read state file");
            }
        }
    }
    out
}
