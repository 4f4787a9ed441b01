//! Task queue: a work queue plus supervised workers driving a sync handler

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use koli_common::kube_utils::object_key;
use koli_common::Error;
use kube::Resource;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[cfg(test)]
use mockall::automock;

use super::{RateLimiter, WorkQueue};

/// Delay before a worker loop that exited abnormally is started again
pub const DEFAULT_WORKER_RESTART_PERIOD: Duration = Duration::from_secs(1);

/// Reconciles the object identified by a queue key
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SyncHandler: Send + Sync + 'static {
    /// Drive the object behind `key` toward its desired state.
    ///
    /// An error requeues the key with backoff; success clears its failure
    /// history.
    async fn sync(&self, key: &str) -> Result<(), Error>;
}

/// A named work queue whose keys are processed by a pool of workers
pub struct TaskQueue {
    queue: Arc<WorkQueue>,
    handler: Arc<dyn SyncHandler>,
    workers: Mutex<JoinSet<()>>,
}

impl TaskQueue {
    /// Create a task queue with the default controller rate limiter
    pub fn new(name: impl Into<String>, handler: Arc<dyn SyncHandler>) -> Self {
        Self::from_queue(WorkQueue::new(name), handler)
    }

    /// Create a task queue with a custom rate limiter
    pub fn with_rate_limiter(
        name: impl Into<String>,
        handler: Arc<dyn SyncHandler>,
        rate_limiter: Box<dyn RateLimiter>,
    ) -> Self {
        Self::from_queue(WorkQueue::with_rate_limiter(name, rate_limiter), handler)
    }

    fn from_queue(queue: WorkQueue, handler: Arc<dyn SyncHandler>) -> Self {
        Self {
            queue: Arc::new(queue),
            handler,
            workers: Mutex::new(JoinSet::new()),
        }
    }

    /// The underlying work queue
    pub fn work_queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Queue `key` for processing
    pub fn add(&self, key: impl Into<String>) {
        self.queue.add(key);
    }

    /// Queue the key of `obj` for processing
    pub fn enqueue<K: Resource>(&self, obj: &K) {
        self.queue.add(object_key(obj));
    }

    /// Number of pending keys
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no key is pending
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Start `workers` supervised worker loops
    ///
    /// A loop that exits abnormally while the queue is still running is
    /// restarted after `restart_period`.
    pub async fn run(self: &Arc<Self>, workers: usize, restart_period: Duration) {
        info!(queue = %self.queue.name(), workers, "Starting workers");
        let mut set = self.workers.lock().await;
        for worker in 0..workers {
            let this = Arc::clone(self);
            set.spawn(async move { this.supervise(worker, restart_period).await });
        }
    }

    /// Shut the queue down and wait for every worker to exit
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self) {
        self.queue.shut_down();
        let mut set = self.workers.lock().await;
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(queue = %self.queue.name(), error = %e, "Worker task ended abnormally");
            }
        }
        info!(queue = %self.queue.name(), "Workers stopped");
    }

    async fn supervise(&self, worker: usize, restart_period: Duration) {
        loop {
            let outcome = AssertUnwindSafe(self.run_worker()).catch_unwind().await;
            if self.queue.is_shutting_down() {
                debug!(queue = %self.queue.name(), worker, "Worker exiting");
                return;
            }
            match outcome {
                Ok(()) => warn!(queue = %self.queue.name(), worker, "Worker loop exited, restarting"),
                Err(panic) => error!(
                    queue = %self.queue.name(),
                    worker,
                    panic = %panic_message(panic.as_ref()),
                    "Worker loop panicked, restarting"
                ),
            }
            tokio::time::sleep(restart_period).await;
        }
    }

    async fn run_worker(&self) {
        while self.process_next_work_item().await {}
    }

    /// Take one key from the queue and sync it
    ///
    /// Returns `false` once the queue is shutting down. The key is always
    /// handed back to the queue, also when the handler panics.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let outcome = AssertUnwindSafe(self.handler.sync(&key))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => self.queue.forget(&key),
            Ok(Err(e)) => {
                let retries = self.queue.num_requeues(&key);
                if e.is_retryable() {
                    warn!(queue = %self.queue.name(), key = %key, retries, error = %e, "Sync failed, requeueing");
                } else {
                    error!(queue = %self.queue.name(), key = %key, retries, error = %e, "Sync failed with a permanent error, requeueing");
                }
                self.queue.add_rate_limited(&key);
            }
            Err(panic) => {
                error!(
                    queue = %self.queue.name(),
                    key = %key,
                    panic = %panic_message(panic.as_ref()),
                    "Sync panicked, requeueing"
                );
                self.queue.add_rate_limited(&key);
            }
        }

        self.queue.done(&key);
        true
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
