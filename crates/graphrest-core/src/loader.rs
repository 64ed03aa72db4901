//! Single-key loader
//!
//! Deduplicates GET requests by [`CanonicalPath`] and memoizes their outcomes.
//!
//! ```text
//!   load("/a") ─┐
//!   load("/b") ─┼──► window [/a, /b] ──flush──► GET /a ┐ (concurrent)
//!   load("/a") ─┘        (deduped)              GET /b ┘
//! ```
//!
//! Every distinct path in a window is one REST call; the calls run
//! concurrently and settle independently, so one failing path never fails
//! its siblings. A loader is meant to live for one logical request scope:
//! there is no TTL and no invalidation beyond [`Loader::clear`].

use crate::path::CanonicalPath;
use crate::transport::{Method, Transport, TransportError};
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

// ============================================================================
// Errors & Configuration
// ============================================================================

/// Why a key failed to load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("fetch for `{0}` stopped before it settled")]
    Cancelled(String),
}

pub type LoadResult = Result<Option<Value>, LoadError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub schedule: BatchSchedule,
    /// Keep settled outcomes for the loader lifetime. When off, only
    /// in-window deduplication remains.
    pub cache: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            schedule: BatchSchedule::Deferred,
            cache: true,
        }
    }
}

/// Counters describing what a loader has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderStats {
    /// Transport calls issued.
    pub fetches: u64,
    /// Non-empty windows flushed.
    pub windows: u64,
    /// Loads answered from a memoized or in-flight entry.
    pub cache_hits: u64,
}

// ============================================================================
// Loader
// ============================================================================

enum Slot {
    Pending(Vec<oneshot::Sender<LoadResult>>),
    Settled(LoadResult),
}

struct State {
    slots: HashMap<CanonicalPath, Slot>,
    window: BatchWindow<CanonicalPath>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: LoaderConfig,
    state: Mutex<State>,
    fetches: AtomicU64,
    cache_hits: AtomicU64,
}

enum Registration {
    Ready(LoadResult),
    Waiting(oneshot::Receiver<LoadResult>),
}

/// Batched, memoizing loader for single-path GETs.
#[derive(Clone)]
pub struct Loader {
    inner: Arc<Inner>,
}

impl Loader {
    pub fn new(transport: Arc<dyn Transport>, config: LoaderConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state: Mutex::new(State {
                    slots: HashMap::new(),
                    window: BatchWindow::for_schedule(config.schedule),
                }),
                fetches: AtomicU64::new(0),
                cache_hits: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Load one path.
    ///
    /// The key joins the current window as soon as this is called, before the
    /// returned future is polled. `Ok(None)` is the soft "not found" outcome.
    pub fn load(
        &self,
        path: impl Into<CanonicalPath>,
    ) -> impl Future<Output = LoadResult> + Send + 'static {
        let path = path.into();
        let registration = self.register(path.clone());
        let inner = Arc::clone(&self.inner);

        async move {
            match registration {
                Registration::Ready(outcome) => outcome,
                Registration::Waiting(rx) => {
                    // Registered outside a runtime: spawn the flush from here.
                    Inner::ensure_scheduled(&inner);
                    rx.await
                        .unwrap_or_else(|_| Err(LoadError::Cancelled(path.into_string())))
                }
            }
        }
    }

    /// Load several paths in one window; results follow input order.
    pub fn load_many<I, P>(&self, paths: I) -> impl Future<Output = Vec<LoadResult>> + Send + 'static
    where
        I: IntoIterator<Item = P>,
        P: Into<CanonicalPath>,
    {
        let pending: Vec<_> = paths.into_iter().map(|p| self.load(p)).collect();
        async move {
            let mut results = Vec::with_capacity(pending.len());
            for fut in pending {
                results.push(fut.await);
            }
            results
        }
    }

    /// Dispatch the current window and wait until every key in it settled.
    pub async fn flush(&self) {
        Inner::flush(Arc::clone(&self.inner)).await;
    }

    /// Seed the cache for `path` unless it already has an entry.
    pub fn prime(&self, path: impl Into<CanonicalPath>, value: Value) {
        if !self.inner.config.cache {
            return;
        }
        let mut state = self.inner.state.lock();
        state
            .slots
            .entry(path.into())
            .or_insert_with(|| Slot::Settled(Ok(Some(value))));
    }

    /// Forget a settled entry. In-flight fetches are left alone.
    pub fn clear(&self, path: &CanonicalPath) {
        let mut state = self.inner.state.lock();
        if matches!(state.slots.get(path), Some(Slot::Settled(_))) {
            state.slots.remove(path);
        }
    }

    /// Forget every settled entry.
    pub fn clear_all(&self) {
        self.inner
            .state
            .lock()
            .slots
            .retain(|_, slot| matches!(slot, Slot::Pending(_)));
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            windows: self.inner.state.lock().window.flushed(),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
        }
    }

    fn register(&self, path: CanonicalPath) -> Registration {
        let mut state = self.inner.state.lock();

        match state.slots.get_mut(&path) {
            Some(Slot::Settled(outcome)) => {
                self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Registration::Ready(outcome.clone());
            }
            Some(Slot::Pending(waiters)) => {
                self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                return Registration::Waiting(rx);
            }
            None => {}
        }

        let (tx, rx) = oneshot::channel();
        state.slots.insert(path.clone(), Slot::Pending(vec![tx]));
        state.window.enqueue(path);
        drop(state);

        Inner::ensure_scheduled(&self.inner);
        Registration::Waiting(rx)
    }
}

impl Inner {
    /// Spawn the deferred flush for an open window, if it still needs one.
    fn ensure_scheduled(inner: &Arc<Self>) {
        if inner.config.schedule != BatchSchedule::Deferred {
            return;
        }
        let mut state = inner.state.lock();
        if !state.window.needs_schedule() {
            return;
        }
        let task_inner = Arc::clone(inner);
        if defer_flush(move || Self::flush(task_inner)) == Scheduled::Spawned {
            state.window.mark_scheduled();
        }
    }

    async fn flush(inner: Arc<Self>) {
        let paths = inner.state.lock().window.take();
        if paths.is_empty() {
            return;
        }
        debug!(keys = paths.len(), "dispatching loader window");

        let handles: Vec<_> = paths
            .into_iter()
            .map(|path| {
                inner.fetches.fetch_add(1, Ordering::Relaxed);
                let task_inner = Arc::clone(&inner);
                let task_path = path.clone();
                let handle = tokio::spawn(async move {
                    let outcome = task_inner
                        .transport
                        .request(Method::Get, task_path.as_str(), None)
                        .await
                        .map_err(|err| {
                            warn!(path = %task_path, error = %err, "fetch failed");
                            LoadError::from(err)
                        });
                    task_inner.settle(&task_path, outcome);
                });
                (path, handle)
            })
            .collect();

        for (path, handle) in handles {
            if handle.await.is_err() {
                inner.settle(&path, Err(LoadError::Cancelled(path.to_string())));
            }
        }
    }

    fn settle(&self, path: &CanonicalPath, outcome: LoadResult) {
        let waiters = {
            let mut state = self.state.lock();
            match state.slots.remove(path) {
                Some(Slot::Pending(waiters)) => {
                    if self.config.cache {
                        state
                            .slots
                            .insert(path.clone(), Slot::Settled(outcome.clone()));
                    }
                    waiters
                }
                Some(settled) => {
                    state.slots.insert(path.clone(), settled);
                    return;
                }
                None => return,
            }
        };

        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;
    use std::time::Duration;

    fn echo_transport() -> Arc<MockTransport> {
        Arc::new(MockTransport::new(|_, path, _| match path {
            "/missing" => Ok(None),
            p if p.starts_with("/fail") => Err(TransportError::Status {
                status: 500,
                body: "boom".into(),
            }),
            p => Ok(Some(json!({ "path": p }))),
        }))
    }

    fn manual() -> LoaderConfig {
        LoaderConfig {
            schedule: BatchSchedule::Manual,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_same_path_in_one_window_fetches_once() {
        let transport = echo_transport();
        let loader = Loader::new(transport.clone(), LoaderConfig::default());

        let a = loader.load("/x");
        let b = loader.load("/x");
        let (a, b) = (a.await, b.await);

        assert_eq!(a, Ok(Some(json!({"path": "/x"}))));
        assert_eq!(a, b);
        assert_eq!(transport.call_count(), 1);
        assert_eq!(loader.stats().windows, 1);
        assert_eq!(loader.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_distinct_paths_share_a_window() {
        let transport = echo_transport();
        let loader = Loader::new(transport.clone(), LoaderConfig::default());

        let results = loader.load_many(["/a", "/b", "/a", "/c"]).await;

        assert_eq!(results.len(), 4);
        assert_eq!(results[2], Ok(Some(json!({"path": "/a"}))));
        assert_eq!(results[3], Ok(Some(json!({"path": "/c"}))));
        assert_eq!(transport.call_count(), 3);
        assert_eq!(loader.stats().windows, 1);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_its_key() {
        let transport = echo_transport();
        let loader = Loader::new(transport.clone(), LoaderConfig::default());

        let failing = loader.load("/fail");
        let ok = loader.load("/ok");

        assert!(matches!(
            failing.await,
            Err(LoadError::Transport(TransportError::Status { status: 500, .. }))
        ));
        assert_eq!(ok.await, Ok(Some(json!({"path": "/ok"}))));
    }

    #[tokio::test]
    async fn test_not_found_is_a_successful_none() {
        let loader = Loader::new(echo_transport(), LoaderConfig::default());
        assert_eq!(loader.load("/missing").await, Ok(None));
    }

    #[tokio::test]
    async fn test_settled_results_are_memoized_across_windows() {
        let transport = echo_transport();
        let loader = Loader::new(transport.clone(), LoaderConfig::default());

        loader.load("/x").await.unwrap();
        loader.load("/x").await.unwrap();
        assert!(loader.load("/fail").await.is_err());
        assert!(loader.load("/fail").await.is_err());

        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_disabled_refetches_each_window() {
        let transport = echo_transport();
        let loader = Loader::new(
            transport.clone(),
            LoaderConfig {
                cache: false,
                ..Default::default()
            },
        );

        loader.load("/x").await.unwrap();
        loader.load("/x").await.unwrap();
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_manual_schedule_waits_for_flush() {
        let transport = echo_transport();
        let loader = Loader::new(transport.clone(), manual());

        let a = loader.load("/a");
        let b = loader.load("/b");
        tokio::task::yield_now().await;
        assert_eq!(transport.call_count(), 0);

        loader.flush().await;
        assert_eq!(transport.call_count(), 2);
        assert!(a.await.is_ok());
        assert!(b.await.is_ok());

        // Loads registered after the flush start the next window.
        let c = loader.load("/c");
        loader.flush().await;
        assert!(c.await.is_ok());
        assert_eq!(loader.stats().windows, 2);
    }

    #[tokio::test]
    async fn test_flush_of_empty_window_is_noop() {
        let transport = echo_transport();
        let loader = Loader::new(transport.clone(), manual());
        loader.flush().await;
        assert_eq!(loader.stats(), LoaderStats::default());
    }

    #[tokio::test]
    async fn test_prime_and_clear() {
        let transport = echo_transport();
        let loader = Loader::new(transport.clone(), LoaderConfig::default());

        loader.prime("/x", json!({"primed": true}));
        assert_eq!(loader.load("/x").await, Ok(Some(json!({"primed": true}))));
        assert_eq!(transport.call_count(), 0);

        loader.clear(&CanonicalPath::from("/x"));
        assert_eq!(loader.load("/x").await, Ok(Some(json!({"path": "/x"}))));
        assert_eq!(transport.call_count(), 1);

        loader.clear_all();
        loader.load("/x").await.unwrap();
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_slow_sibling_does_not_block_fast_key() {
        let transport = Arc::new(
            MockTransport::new(|_, path, _| Ok(Some(json!(path)))).with_latency(|path| {
                if path == "/slow" {
                    Duration::from_millis(200)
                } else {
                    Duration::from_millis(1)
                }
            }),
        );
        let loader = Loader::new(transport, LoaderConfig::default());

        let slow = loader.load("/slow");
        let fast = loader.load("/fast");

        let fast = tokio::time::timeout(Duration::from_millis(150), fast).await;
        assert_eq!(fast.expect("fast key settled first"), Ok(Some(json!("/fast"))));
        assert_eq!(slow.await, Ok(Some(json!("/slow"))));
    }

    #[test]
    fn test_load_registered_outside_runtime_schedules_on_poll() {
        let transport = echo_transport();
        let loader = Loader::new(transport.clone(), LoaderConfig::default());
        let pending = loader.load("/x");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        assert_eq!(runtime.block_on(pending), Ok(Some(json!({"path": "/x"}))));
        assert_eq!(transport.call_count(), 1);
    }
}
