//! # Serial Execution Queue
//!
//! Runs async tasks one at a time in the order they were submitted.
//!
//! Built on `tokio::sync::Mutex`, which hands out the lock in FIFO order. A
//! task that fails or panics releases its turn like any other, so callers only
//! ever see their own outcome.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
pub struct SerialQueue {
    turn: Mutex<()>,
    pending: AtomicUsize,
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SerialQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `task` and wait for its result.
    ///
    /// The task is submitted when the returned future is first polled.
    pub async fn add<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let _pending = PendingGuard(&self.pending);

        let _turn = self.turn.lock().await;
        task().await
    }

    /// Tasks queued or running
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}
