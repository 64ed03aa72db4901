//! Batch windows
//!
//! A window collects load requests until it is flushed. When the flush
//! happens is a policy of the owning loader:
//!
//! - [`BatchSchedule::Deferred`]: the first enqueue spawns a task that yields
//!   once and then flushes. Every request registered before that task runs
//!   joins the window, which mirrors "everything issued in the same tick".
//! - [`BatchSchedule::Manual`]: nothing happens until the owner calls `flush`.
//!   Useful in tests where batching boundaries must be exact.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::runtime::Handle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSchedule {
    #[default]
    Deferred,
    Manual,
}

/// Entries waiting for the next flush, in enqueue order.
#[derive(Debug)]
pub struct BatchWindow<T> {
    entries: Vec<T>,
    flushed: u64,
    /// Owner spawns flushes itself; when false nothing is ever unscheduled.
    deferred: bool,
    /// Open, but no flush task has been spawned for it yet.
    unscheduled: bool,
}

impl<T> Default for BatchWindow<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BatchWindow<T> {
    /// A window flushed under [`BatchSchedule::Deferred`].
    pub fn new() -> Self {
        Self::for_schedule(BatchSchedule::Deferred)
    }

    pub fn for_schedule(schedule: BatchSchedule) -> Self {
        Self {
            entries: Vec::new(),
            flushed: 0,
            deferred: schedule == BatchSchedule::Deferred,
            unscheduled: false,
        }
    }

    /// Add an entry. Returns `true` when this entry opened a new window.
    pub fn enqueue(&mut self, entry: T) -> bool {
        let opened = self.entries.is_empty();
        self.entries.push(entry);
        if opened && self.deferred {
            self.unscheduled = true;
        }
        opened
    }

    /// Close the current window and hand its entries over.
    pub fn take(&mut self) -> Vec<T> {
        if !self.entries.is_empty() {
            self.flushed += 1;
        }
        self.unscheduled = false;
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the open window still waits for a deferred flush to be spawned.
    pub fn needs_schedule(&self) -> bool {
        self.unscheduled
    }

    pub fn mark_scheduled(&mut self) {
        self.unscheduled = false;
    }

    /// Number of non-empty windows taken so far.
    pub fn flushed(&self) -> u64 {
        self.flushed
    }
}

/// Outcome of trying to schedule a deferred flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scheduled {
    Spawned,
    /// No runtime on this thread; the caller must retry from inside one.
    NoRuntime,
}

/// Spawn `flush` on the current runtime after yielding once.
pub(crate) fn defer_flush<F, Fut>(flush: F) -> Scheduled
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::task::yield_now().await;
                flush().await;
            });
            Scheduled::Spawned
        }
        Err(_) => Scheduled::NoRuntime,
    }
}
