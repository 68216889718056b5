//! Debounced saver (C2): per-key coalescing timer that invokes a
//! user-supplied persistor after the most recent schedule for that key goes
//! quiet for `delay`.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

type Executor<K, P> =
    Arc<dyn Fn(K, P) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

struct Entry<P> {
    payload: P,
    timer: JoinHandle<()>,
}

/// Coalesces repeated `schedule(key, payload)` calls into a single persist
/// per key, `delay` after the last call for that key.
pub struct Debouncer<K, P> {
    delay: Duration,
    executor: Executor<K, P>,
    entries: Arc<Mutex<HashMap<K, Entry<P>>>>,
}

impl<K, P> Debouncer<K, P>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(delay: Duration, executor: F) -> Self
    where
        F: Fn(K, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            delay,
            executor: Arc::new(move |k, p| Box::pin(executor(k, p))),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule `payload` to be persisted for `key` after `delay`. If a
    /// timer is already pending for `key`, it is replaced: only the latest
    /// payload is ever delivered.
    pub async fn schedule(&self, key: K, payload: P) {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.remove(&key) {
            existing.timer.abort();
        }

        let delay = self.delay;
        let executor = Arc::clone(&self.executor);
        let entries_for_timer = Arc::clone(&self.entries);
        let key_for_timer = key.clone();
        let payload_for_timer = payload.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Remove ourselves before firing so concurrent `flush`/`schedule`
            // calls don't race against a timer that's about to run anyway.
            let fired_payload = {
                let mut entries = entries_for_timer.lock().await;
                entries.remove(&key_for_timer).map(|e| e.payload)
            };
            let payload = fired_payload.unwrap_or(payload_for_timer);
            if let Err(err) = executor(key_for_timer, payload).await {
                tracing::warn!(error = %err, "debounced save failed");
            }
        });

        entries.insert(key, Entry { payload, timer });
    }

    /// Fire the persistor immediately for `key` (or, if `None`, for every
    /// pending key), bypassing the remaining delay.
    pub async fn flush(&self, key: Option<K>) {
        let to_fire: Vec<(K, P)> = {
            let mut entries = self.entries.lock().await;
            match key {
                Some(k) => match entries.remove(&k) {
                    Some(entry) => {
                        entry.timer.abort();
                        vec![(k, entry.payload)]
                    }
                    None => Vec::new(),
                },
                None => entries
                    .drain()
                    .map(|(k, entry)| {
                        entry.timer.abort();
                        (k, entry.payload)
                    })
                    .collect(),
            }
        };
        for (k, p) in to_fire {
            if let Err(err) = (self.executor)(k, p).await {
                tracing::warn!(error = %err, "flushed save failed");
            }
        }
    }

    /// Drop any pending schedule for `key` (or all keys) without executing.
    pub async fn cancel(&self, key: Option<K>) {
        let mut entries = self.entries.lock().await;
        match key {
            Some(k) => {
                if let Some(entry) = entries.remove(&k) {
                    entry.timer.abort();
                }
            }
            None => {
                for (_, entry) in entries.drain() {
                    entry.timer.abort();
                }
            }
        }
    }

    pub async fn has_pending(&self, key: Option<K>) -> bool {
        let entries = self.entries.lock().await;
        match key {
            Some(k) => entries.contains_key(&k),
            None => !entries.is_empty(),
        }
    }
}
