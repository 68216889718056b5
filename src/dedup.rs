//! Request deduplicator (C10): coalesces identical in-flight requests by a
//! content-hash key, with a TTL'd, LRU-bounded result cache.
//!
//! Rust futures aren't `Clone` the way JS promises are, so an in-flight call
//! can't simply be handed out twice; instead, concurrent callers subscribe to
//! a `tokio::sync::broadcast` channel that the single executing call
//! publishes its result on.

use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};

/// The cached or in-flight outcome of one deduplicated call.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Ok(T),
    Err(String),
}

enum Slot<T> {
    InFlight(broadcast::Sender<Outcome<T>>),
    Done { outcome: Outcome<T>, at: Instant },
}

/// Coalesces concurrent calls sharing a key and caches completed results for
/// a bounded TTL.
pub struct Deduplicator<T> {
    ttl: Duration,
    include_errors: bool,
    slots: Mutex<HashMap<String, Slot<T>>>,
    lru: Mutex<LruCache<String, ()>>,
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(ttl: Duration, max_size: usize, include_errors: bool) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap();
        Self {
            ttl,
            include_errors,
            slots: Mutex::new(HashMap::new()),
            lru: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(
            Duration::from_secs(crate::config::dedup_ttl_seconds()),
            crate::config::dedup_max_size(),
            false,
        )
    }

    /// Hash `args` (already JSON-encoded by the caller) to a 16-hex-char key.
    #[must_use]
    pub fn key_for(args_json: &str) -> String {
        let digest = Sha256::digest(args_json.as_bytes());
        hex_prefix(&digest, 16)
    }

    /// Run `f()` under `key`, coalescing concurrent callers and reusing a
    /// result cached within `ttl`.
    pub async fn execute<F, Fut, E>(&self, key: String, f: F) -> Result<T, String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ToString,
    {
        let mut rx_if_inflight = None;
        {
            let mut slots = self.slots.lock().await;
            match slots.get(&key) {
                Some(Slot::InFlight(tx)) => {
                    rx_if_inflight = Some(tx.subscribe());
                }
                Some(Slot::Done { outcome, at }) => {
                    if at.elapsed() <= self.ttl {
                        return match outcome.clone() {
                            Outcome::Ok(v) => Ok(v),
                            Outcome::Err(e) => Err(e),
                        };
                    }
                    slots.remove(&key);
                }
                None => {}
            }

            if rx_if_inflight.is_none() {
                let (tx, _rx) = broadcast::channel(1);
                slots.insert(key.clone(), Slot::InFlight(tx));
            }
        }

        if let Some(mut rx) = rx_if_inflight {
            return match rx.recv().await {
                Ok(Outcome::Ok(v)) => Ok(v),
                Ok(Outcome::Err(e)) => Err(e),
                Err(_) => Err("deduplicated call's sender was dropped".to_string()),
            };
        }

        let result = f().await;
        let outcome = match &result {
            Ok(v) => Outcome::Ok(v.clone()),
            Err(e) => Outcome::Err(e.to_string()),
        };

        let should_cache = matches!(outcome, Outcome::Ok(_)) || self.include_errors;

        let mut slots = self.slots.lock().await;
        if let Some(Slot::InFlight(tx)) = slots.remove(&key) {
            let _ = tx.send(outcome.clone());
        }
        if should_cache {
            slots.insert(
                key.clone(),
                Slot::Done {
                    outcome: outcome.clone(),
                    at: Instant::now(),
                },
            );
            let mut lru = self.lru.lock().await;
            if let Some((evicted_key, ())) = lru.push(key, ()) {
                slots.remove(&evicted_key);
            }
        }

        match outcome {
            Outcome::Ok(v) => Ok(v),
            Outcome::Err(e) => Err(e),
        }
    }

    /// Evict TTL-expired `Done` slots. Intended to run at most once per
    /// `dedup_sweep_interval_seconds()`.
    pub async fn sweep(&self) {
        let mut slots = self.slots.lock().await;
        slots.retain(|_, slot| match slot {
            Slot::InFlight(_) => true,
            Slot::Done { at, .. } => at.elapsed() <= self.ttl,
        });
    }
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for byte in bytes {
        if out.len() >= len {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(len);
    out
}

/// Spawn a background task that sweeps `dedup` on the configured interval
/// until the returned handle is dropped/aborted.
pub fn spawn_sweeper<T>(dedup: Arc<Deduplicator<T>>) -> tokio::task::JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let interval = Duration::from_secs(crate::config::dedup_sweep_interval_seconds());
        loop {
            tokio::time::sleep(interval).await;
            dedup.sweep().await;
        }
    })
}
