//! Level-triggered controller loop shared by every reconciler
//!
//! Informer notifications pass an event filter and are reduced to object
//! keys on the task queue. Workers only start once every cache the controller
//! reads from has synced, so a partially listed cache is never mistaken for
//! deleted objects.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::informer::{wait_for_cache_sync, CachedObject, HasSynced, ResourceEvent};
use crate::queue::{TaskQueue, DEFAULT_WORKER_RESTART_PERIOD};

/// Decides whether an informer notification enqueues its object
pub type EventFilter<K> = fn(&ResourceEvent<K>) -> bool;

/// A task queue fed by one informer subscription
pub struct Controller<K: CachedObject> {
    name: String,
    tasks: Arc<TaskQueue>,
    events: mpsc::UnboundedReceiver<ResourceEvent<K>>,
    filter: EventFilter<K>,
    caches: Vec<Arc<dyn HasSynced>>,
}

impl<K: CachedObject> Controller<K> {
    /// Assemble a controller
    ///
    /// `caches` are every cache the sync handler reads; workers wait for all
    /// of them.
    pub fn new(
        name: impl Into<String>,
        tasks: Arc<TaskQueue>,
        events: mpsc::UnboundedReceiver<ResourceEvent<K>>,
        filter: EventFilter<K>,
        caches: Vec<Arc<dyn HasSynced>>,
    ) -> Self {
        Self {
            name: name.into(),
            tasks,
            events,
            filter,
            caches,
        }
    }

    /// The controller's task queue
    pub fn tasks(&self) -> &Arc<TaskQueue> {
        &self.tasks
    }

    /// Run until `shutdown` fires, then stop the workers and return
    pub async fn run(self, workers: usize, shutdown: CancellationToken) {
        let Controller {
            name,
            tasks,
            mut events,
            filter,
            caches,
        } = self;

        info!(controller = %name, "Starting controller");

        let pump = {
            let tasks = Arc::clone(&tasks);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        event = events.recv() => match event {
                            Some(event) if filter(&event) => tasks.enqueue(event.object().as_ref()),
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
            })
        };

        if wait_for_cache_sync(&name, &shutdown, &caches).await {
            tasks.run(workers, DEFAULT_WORKER_RESTART_PERIOD).await;
            shutdown.cancelled().await;
            info!(controller = %name, "Shutting down controller");
        }

        tasks.shutdown().await;
        if pump.await.is_err() {
            debug!(controller = %name, "Event pump ended abnormally");
        }
    }
}

/// Enqueue unless an update left the resource version untouched
pub fn on_resource_version_change<K: CachedObject>(event: &ResourceEvent<K>) -> bool {
    match event {
        ResourceEvent::Updated { old, new } => {
            old.meta().resource_version != new.meta().resource_version
        }
        ResourceEvent::Added(_) | ResourceEvent::Deleted(_) => true,
    }
}
