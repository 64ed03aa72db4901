//! Keyed bulk loader
//!
//! Turns many `load(key)` calls into a few bulk GETs:
//!
//! ```text
//!   keys (window)      chunks (25)          one GET per chunk      demux by key_fn
//!   k0 k1 ... k59  ─►  [k0..k24]      ─►    path_fn([k0..k24])  ─┐
//!                      [k25..k49]     ─►    path_fn([k25..k49]) ─┼─► k0 → [items]
//!                      [k50..k59]     ─►    path_fn([k50..k59]) ─┘   k1 → []
//! ```
//!
//! This is a one-to-many join: each key resolves to every returned item whose
//! join key matches, possibly none. Items for keys nobody asked for are
//! dropped. A failed chunk fails exactly the requests it carried; a repeated
//! key that landed in another chunk settles from that chunk instead.

use crate::loader::LoadError;
use crate::transport::{Method, Transport};
use crate::window::{defer_flush, BatchSchedule, BatchWindow, Scheduled};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 25;

pub type BulkResult = Result<Vec<Value>, LoadError>;

/// Builds the bulk request path for one chunk of keys.
pub type PathFn = dyn Fn(&[String]) -> String + Send + Sync;
/// Extracts the join key of a returned item.
pub type KeyFn = dyn Fn(&Value) -> Option<String> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk size must be at least 1")]
    ZeroChunkSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub chunk_size: usize,
    /// Collapse repeated keys before chunking. Off by default: every call
    /// contributes its key to the request, duplicates included.
    pub dedupe_keys: bool,
    pub schedule: BatchSchedule,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            dedupe_keys: false,
            schedule: BatchSchedule::Deferred,
        }
    }
}

/// Partition `keys` into consecutive chunks of at most `size` entries.
pub fn chunk_keys<T: Clone>(keys: &[T], size: usize) -> Vec<Vec<T>> {
    keys.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}

/// Items carried by one chunk response. `null` entries are discarded.
fn payload_items(payload: Option<Value>) -> Vec<Value> {
    match payload {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.into_iter().filter(|v| !v.is_null()).collect(),
        Some(single) => vec![single],
    }
}

struct Request {
    key: String,
    tx: oneshot::Sender<BulkResult>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    path_fn: Box<PathFn>,
    key_fn: Box<KeyFn>,
    config: BulkConfig,
    window: Mutex<BatchWindow<Request>>,
    chunks: AtomicU64,
}

/// Batched loader resolving each key to the list of items that join on it.
#[derive(Clone)]
pub struct BulkLoader {
    inner: Arc<Inner>,
}

impl BulkLoader {
    pub fn new<P, K>(
        transport: Arc<dyn Transport>,
        path_fn: P,
        key_fn: K,
        config: BulkConfig,
    ) -> Result<Self, ConfigError>
    where
        P: Fn(&[String]) -> String + Send + Sync + 'static,
        K: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        if config.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                path_fn: Box::new(path_fn),
                key_fn: Box::new(key_fn),
                config,
                window: Mutex::new(BatchWindow::for_schedule(config.schedule)),
                chunks: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &BulkConfig {
        &self.inner.config
    }

    /// Queue `key` for the current window.
    pub fn load(
        &self,
        key: impl Into<String>,
    ) -> impl Future<Output = BulkResult> + Send + 'static {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        self.inner.window.lock().enqueue(Request {
            key: key.clone(),
            tx,
        });
        Inner::ensure_scheduled(&self.inner);
        let inner = Arc::clone(&self.inner);

        async move {
            // Registered outside a runtime: spawn the flush from here.
            Inner::ensure_scheduled(&inner);
            rx.await.unwrap_or_else(|_| Err(LoadError::Cancelled(key)))
        }
    }

    /// Load several keys in one window; results follow input order.
    pub fn load_many<I, S>(&self, keys: I) -> impl Future<Output = Vec<BulkResult>> + Send + 'static
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pending: Vec<_> = keys.into_iter().map(|k| self.load(k)).collect();
        async move {
            let mut results = Vec::with_capacity(pending.len());
            for fut in pending {
                results.push(fut.await);
            }
            results
        }
    }

    /// Dispatch the current window and wait until every key in it resolved.
    pub async fn flush(&self) {
        Inner::flush(Arc::clone(&self.inner)).await;
    }

    /// Bulk requests issued so far.
    pub fn chunks_dispatched(&self) -> u64 {
        self.inner.chunks.load(Ordering::Relaxed)
    }
}

impl Inner {
    fn ensure_scheduled(inner: &Arc<Self>) {
        if inner.config.schedule != BatchSchedule::Deferred {
            return;
        }
        let mut window = inner.window.lock();
        if !window.needs_schedule() {
            return;
        }
        let task_inner = Arc::clone(inner);
        if defer_flush(move || Self::flush(task_inner)) == Scheduled::Spawned {
            window.mark_scheduled();
        }
    }

    async fn flush(inner: Arc<Self>) {
        let requests = inner.window.lock().take();
        if requests.is_empty() {
            return;
        }

        // Keys sent to the backend, and the chunk each request rides in.
        let size = inner.config.chunk_size;
        let (keys, chunk_of): (Vec<String>, Vec<usize>) = if inner.config.dedupe_keys {
            let mut first_seen: HashMap<&str, usize> = HashMap::new();
            let mut keys = Vec::new();
            let chunk_of = requests
                .iter()
                .map(|r| {
                    let idx = *first_seen.entry(r.key.as_str()).or_insert_with(|| {
                        keys.push(r.key.clone());
                        keys.len() - 1
                    });
                    idx / size
                })
                .collect();
            (keys, chunk_of)
        } else {
            let keys = requests.iter().map(|r| r.key.clone()).collect();
            (keys, (0..requests.len()).map(|i| i / size).collect())
        };

        let chunks = chunk_keys(&keys, size);
        debug!(
            keys = keys.len(),
            chunks = chunks.len(),
            "dispatching bulk window"
        );

        let handles: Vec<_> = chunks
            .iter()
            .map(|chunk| {
                inner.chunks.fetch_add(1, Ordering::Relaxed);
                let path = (inner.path_fn)(chunk);
                let transport = Arc::clone(&inner.transport);
                tokio::spawn(async move { transport.request(Method::Get, &path, None).await })
            })
            .collect();

        // One outcome per chunk: its items grouped by requested key, or the error.
        let mut outcomes: Vec<Result<HashMap<String, Vec<Value>>, LoadError>> =
            Vec::with_capacity(chunks.len());
        for (chunk, handle) in chunks.iter().zip(handles) {
            let outcome = match handle.await {
                Ok(Ok(payload)) => {
                    let mut grouped: HashMap<String, Vec<Value>> =
                        chunk.iter().map(|k| (k.clone(), Vec::new())).collect();
                    for item in payload_items(payload) {
                        let Some(key) = (inner.key_fn)(&item) else {
                            continue;
                        };
                        if let Some(bucket) = grouped.get_mut(&key) {
                            bucket.push(item);
                        }
                    }
                    Ok(grouped)
                }
                Ok(Err(err)) => {
                    warn!(keys = chunk.len(), error = %err, "bulk chunk failed");
                    Err(LoadError::from(err))
                }
                Err(_) => Err(LoadError::Cancelled(format!("chunk of {} keys", chunk.len()))),
            };
            outcomes.push(outcome);
        }

        for (request, chunk) in requests.into_iter().zip(chunk_of) {
            let outcome = match &outcomes[chunk] {
                Ok(grouped) => Ok(grouped.get(&request.key).cloned().unwrap_or_default()),
                Err(err) => Err(err.clone()),
            };
            let _ = request.tx.send(outcome);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
