//! Deduplicating, rate-limited work queue of object keys
//!
//! A key is in at most one of three states at a time from a worker's point of
//! view:
//! - pending: waiting in the FIFO, eligible for [`WorkQueue::get`]
//! - processing: checked out by exactly one worker
//! - dirty: re-added while processing, redelivered once [`WorkQueue::done`]
//!   is called
//!
//! Adding a key that is already pending is a no-op, so a burst of events for
//! one object coalesces into a single delivery.

mod rate_limiter;
mod task_queue;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use koli_common::metrics;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub use rate_limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ExponentialFailureRateLimiter,
    MaxOfRateLimiter, RateLimiter, DEFAULT_BASE_DELAY, DEFAULT_BURST, DEFAULT_MAX_DELAY,
    DEFAULT_QPS,
};
pub use task_queue::{SyncHandler, TaskQueue, DEFAULT_WORKER_RESTART_PERIOD};

#[cfg(test)]
pub use task_queue::MockSyncHandler;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

/// Work queue with client-go semantics
pub struct WorkQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter>,
    shutdown: CancellationToken,
}

impl WorkQueue {
    /// Create a queue named `name` using the default controller rate limiter
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_rate_limiter(name, Box::new(default_controller_rate_limiter()))
    }

    /// Create a queue named `name` with a custom rate limiter
    pub fn with_rate_limiter(name: impl Into<String>, rate_limiter: Box<dyn RateLimiter>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            rate_limiter,
            shutdown: CancellationToken::new(),
        }
    }

    /// Name used in logs and metrics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark `key` as needing processing
    ///
    /// No-op when the key is already pending or the queue is shutting down. A
    /// key currently processing is only marked dirty and is queued again by
    /// [`WorkQueue::done`].
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let depth = {
            let mut state = self.state.lock();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                trace!(queue = %self.name, key = %key, "Key is processing, marked dirty");
                return;
            }
            state.queue.push_back(key);
            state.queue.len()
        };
        metrics::record_queue_add(&self.name);
        metrics::record_queue_depth(&self.name, depth);
        self.notify.notify_one();
    }

    /// Wait for the next key and mark it processing
    ///
    /// Returns `None` once the queue is shutting down. Every key returned must
    /// be handed back with [`WorkQueue::done`].
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a wakeup between the check
            // and the await is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    metrics::record_queue_depth(&self.name, state.queue.len());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Finish processing `key`, queueing it again if it was re-added meanwhile
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.queue.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Clear the failure history of `key`
    pub fn forget(&self, key: &str) {
        self.rate_limiter.forget(key);
    }

    /// Number of consecutive failures recorded for `key`
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.rate_limiter.num_requeues(key)
    }

    /// Add `key` after the delay chosen by the rate limiter
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        metrics::record_queue_retry(&self.name);
        let delay = self.rate_limiter.when(key);
        self.add_after(key, delay);
    }

    /// Add `key` once `delay` has elapsed
    ///
    /// Pending delayed adds are dropped when the queue shuts down.
    pub fn add_after(self: &Arc<Self>, key: &str, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Number of pending keys
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether no key is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting keys and wake every waiting worker
    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.shutdown.cancel();
        self.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] was called
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}
