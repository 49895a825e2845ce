//! Cross-request response reordering
//!
//! Requests matched by an `out_of_order` rule park here instead of returning
//! straight to the client. Once a batch reaches the rule's minimum size, or
//! the oldest entry has waited out the maximum, the whole batch is released
//! in a Fisher–Yates permutation. Each waiter blocks on its own oneshot;
//! dropping a ticket (the request was canceled) removes its entry without
//! disturbing the rest of the batch.

use crate::stats::ChaosStats;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<usize>,
}

struct QueueState {
    waiters: Vec<Waiter>,
    timer_epoch: u64,
}

/// Batching buffer for `out_of_order` responses
pub struct ReorderQueue {
    state: Mutex<QueueState>,
    rng: Arc<Mutex<StdRng>>,
    stats: Arc<ChaosStats>,
    next_id: AtomicU64,
}

impl ReorderQueue {
    /// Create a queue sharing the engine's RNG and statistics
    pub fn new(rng: Arc<Mutex<StdRng>>, stats: Arc<ChaosStats>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                waiters: Vec::new(),
                timer_epoch: 0,
            }),
            rng,
            stats,
            next_id: AtomicU64::new(0),
        }
    }

    /// Entries currently parked
    pub fn pending(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Park one response until its batch releases
    ///
    /// Flushes immediately when the batch reaches `min_requests`; otherwise
    /// the first entry of a batch arms a timer that flushes whatever has
    /// accumulated after `max_wait`.
    pub fn enqueue(self: &Arc<Self>, min_requests: usize, max_wait: Duration) -> ReorderTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let should_flush = {
            let mut state = self.state.lock();
            state.waiters.push(Waiter { id, tx });
            let reached_batch = state.waiters.len() >= min_requests.max(1);
            if !reached_batch && state.waiters.len() == 1 {
                state.timer_epoch += 1;
                let epoch = state.timer_epoch;
                let queue = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(max_wait).await;
                    queue.flush_if_epoch(epoch);
                });
            }
            reached_batch
        };

        if should_flush {
            self.flush();
        }

        ReorderTicket {
            queue: Arc::clone(self),
            id,
            rx,
        }
    }

    /// Release every parked entry in a random permutation
    pub fn flush(&self) {
        let mut batch: Vec<Waiter> = {
            let mut state = self.state.lock();
            state.waiters.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }

        batch.shuffle(&mut *self.rng.lock());
        let released = batch.len();
        self.stats.record_reorders(released as u64);
        debug!(released, "Releasing reordered batch");

        for (rank, waiter) in batch.into_iter().enumerate() {
            // A receiver can be gone if its request was canceled mid-flush.
            let _ = waiter.tx.send(rank);
        }
    }

    fn flush_if_epoch(&self, epoch: u64) {
        let stale = {
            let state = self.state.lock();
            state.timer_epoch != epoch || state.waiters.is_empty()
        };
        if !stale {
            self.flush();
        }
    }

    fn remove(&self, id: u64) {
        let mut state = self.state.lock();
        state.waiters.retain(|waiter| waiter.id != id);
    }
}

/// A parked response's handle on its batch
///
/// Await [`ReorderTicket::wait`] for the release rank. Dropping the ticket
/// without waiting removes the entry from the queue; that is how request
/// cancellation propagates here.
pub struct ReorderTicket {
    queue: Arc<ReorderQueue>,
    id: u64,
    rx: oneshot::Receiver<usize>,
}

impl ReorderTicket {
    /// Block until the batch releases; returns this entry's release rank
    ///
    /// `None` means the queue went away before the batch flushed.
    pub async fn wait(mut self) -> Option<usize> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for ReorderTicket {
    fn drop(&mut self) {
        // No-op after a flush: the waiter was already drained.
        self.queue.remove(self.id);
    }
}
