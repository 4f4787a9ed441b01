//! Shared informer: a watched, locally cached view of one resource type
//!
//! The cache is a kube reflector store. On top of it the informer computes
//! add/update/delete notifications, including deletions discovered when a
//! relist no longer contains an object, and fans them out to subscribers.
//! Subscribers only ever receive notifications after the store reflects them.
//! The reflector buffers a relist until it completes, so notifications for
//! relisted objects are held back until the buffer is swapped in.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use koli_common::kube_utils::split_key;
use koli_common::Error;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval at which [`wait_for_cache_sync`] re-checks the caches
pub const CACHE_SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Server-side watch timeout (seconds). Must stay below the client read
/// timeout so the API server ends idle watches before the client gives up.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Watcher configuration used by [`Informer::run`]
pub fn watch_config() -> watcher::Config {
    watcher::Config::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Objects an [`Informer`] can cache
pub trait CachedObject:
    Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> CachedObject for K where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static
{
}

/// A change observed by an informer
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    /// The object appeared in the cache
    Added(Arc<K>),
    /// The object changed; `old` is the previously cached version
    Updated {
        /// Previously cached version
        old: Arc<K>,
        /// Current version
        new: Arc<K>,
    },
    /// The object left the cache; carries its last known state
    Deleted(Arc<K>),
}

impl<K> ResourceEvent<K> {
    /// The most recent version of the object
    pub fn object(&self) -> &Arc<K> {
        match self {
            ResourceEvent::Added(obj) | ResourceEvent::Deleted(obj) => obj,
            ResourceEvent::Updated { new, .. } => new,
        }
    }
}

/// Reports whether a cache finished its initial listing
pub trait HasSynced: Send + Sync {
    /// True once the initial listing is fully reflected in the cache
    fn has_synced(&self) -> bool;
}

/// Read access to cached objects
pub trait ObjectCache<K>: HasSynced {
    /// Look an object up by `namespace/name` (or `name`) key
    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>, Error>;

    /// Snapshot of every cached object
    fn list(&self) -> Vec<Arc<K>>;
}

/// Watched cache of one resource type with change notifications
pub struct Informer<K: CachedObject> {
    kind: String,
    reader: Store<K>,
    writer: Mutex<Writer<K>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ResourceEvent<K>>>>,
    relisting: Mutex<Option<Relist<K>>>,
    synced: AtomicBool,
}

/// State of an in-progress listing
struct Relist<K: CachedObject> {
    /// Cache contents when the listing started
    previous: HashMap<ObjectRef<K>, Arc<K>>,
    /// Objects listed so far, not yet visible in the store
    listed: Vec<Arc<K>>,
}

impl<K: CachedObject> Default for Informer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CachedObject> Informer<K> {
    /// Create an empty, unsynced informer
    pub fn new() -> Self {
        let writer = Writer::<K>::default();
        Self {
            kind: K::kind(&()).into_owned(),
            reader: writer.as_reader(),
            writer: Mutex::new(writer),
            subscribers: Mutex::new(Vec::new()),
            relisting: Mutex::new(None),
            synced: AtomicBool::new(false),
        }
    }

    /// Receive every change applied from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ResourceEvent<K>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// The underlying reflector store
    pub fn store(&self) -> Store<K> {
        self.reader.clone()
    }

    /// Apply one watcher event to the cache and notify subscribers
    pub fn apply(&self, event: Event<K>) {
        let notifications = {
            let mut writer = self.writer.lock();
            let notifications = self.diff(&event);
            writer.apply_watcher_event(&event);
            if matches!(event, Event::InitDone) && !self.synced.swap(true, Ordering::SeqCst) {
                info!(kind = %self.kind, objects = self.reader.state().len(), "Cache synced");
            }
            notifications
        };

        if notifications.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| {
            notifications
                .iter()
                .all(|notification| tx.send(notification.clone()).is_ok())
        });
    }

    /// Notifications for `event`, computed against the store before it is applied
    fn diff(&self, event: &Event<K>) -> Vec<ResourceEvent<K>> {
        match event {
            Event::Apply(obj) => vec![self.upsert(obj)],
            Event::Delete(obj) => vec![ResourceEvent::Deleted(Arc::new(obj.clone()))],
            Event::Init => {
                let previous = self
                    .reader
                    .state()
                    .into_iter()
                    .map(|obj| (ObjectRef::from_obj(obj.as_ref()), obj))
                    .collect();
                *self.relisting.lock() = Some(Relist {
                    previous,
                    listed: Vec::new(),
                });
                Vec::new()
            }
            Event::InitApply(obj) => {
                if let Some(relist) = self.relisting.lock().as_mut() {
                    relist.listed.push(Arc::new(obj.clone()));
                }
                Vec::new()
            }
            Event::InitDone => {
                let Some(Relist {
                    mut previous,
                    listed,
                }) = self.relisting.lock().take()
                else {
                    return Vec::new();
                };
                let mut notifications: Vec<_> = listed
                    .into_iter()
                    .map(|new| match previous.remove(&ObjectRef::from_obj(new.as_ref())) {
                        Some(old) => ResourceEvent::Updated { old, new },
                        None => ResourceEvent::Added(new),
                    })
                    .collect();
                notifications.extend(previous.into_values().map(ResourceEvent::Deleted));
                notifications
            }
        }
    }

    fn upsert(&self, obj: &K) -> ResourceEvent<K> {
        let new = Arc::new(obj.clone());
        match self.reader.get(&ObjectRef::from_obj(obj)) {
            Some(old) => ResourceEvent::Updated { old, new },
            None => ResourceEvent::Added(new),
        }
    }

    /// Watch `api` and feed the cache until `shutdown` fires
    ///
    /// Watch errors are retried with the default kube backoff.
    pub async fn run(&self, api: Api<K>, shutdown: CancellationToken) {
        info!(kind = %self.kind, "Starting informer");
        let stream = watcher::watcher(api, watch_config()).default_backoff();
        tokio::pin!(stream);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(kind = %self.kind, "Informer cancelled");
                    break;
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => self.apply(event),
                    Some(Err(e)) => warn!(kind = %self.kind, error = %e, "Watch error, backing off"),
                    None => break,
                }
            }
        }
        info!(kind = %self.kind, "Informer stopped");
    }
}

impl<K: CachedObject> HasSynced for Informer<K> {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

impl<K: CachedObject> ObjectCache<K> for Informer<K> {
    fn get_by_key(&self, key: &str) -> Result<Option<Arc<K>>, Error> {
        let (namespace, name) = split_key(key)?;
        let mut object_ref = ObjectRef::<K>::new(name);
        if let Some(ns) = namespace {
            object_ref = object_ref.within(ns);
        }
        Ok(self.reader.get(&object_ref))
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.reader.state()
    }
}

/// Wait until every cache reports its initial listing complete
///
/// Returns `false` when `shutdown` fires first.
pub async fn wait_for_cache_sync(
    controller: &str,
    shutdown: &CancellationToken,
    caches: &[Arc<dyn HasSynced>],
) -> bool {
    loop {
        if caches.iter().all(|cache| cache.has_synced()) {
            debug!(controller, "Caches synced");
            return true;
        }
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!(controller, "Shutdown before caches synced");
                return false;
            }
            _ = tokio::time::sleep(CACHE_SYNC_POLL_INTERVAL) => {}
        }
    }
}
