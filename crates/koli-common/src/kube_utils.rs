//! Shared Kubernetes utilities using kube-rs

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};
use tracing::trace;

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients. Watchers must request a
/// server-side timeout below this, or idle watches fail with a read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Key identifying an object in queues and caches: `namespace/name`, or just
/// `name` for cluster-scoped objects.
pub fn object_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, obj.name_any()),
        _ => obj.name_any(),
    }
}

/// Split a key produced by [`object_key`] into namespace and name
pub fn split_key(key: &str) -> Result<(Option<&str>, &str), Error> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((None, name)),
        (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
            Ok((Some(ns), name))
        }
        _ => Err(Error::invalid_key(key)),
    }
}

/// Poll until a condition is met, a check fails, or the timeout is reached
///
/// `check_fn` returns `Ok(true)` when the condition is met and `Ok(false)` to
/// keep polling. An `Err` ends polling immediately and is returned as is, so
/// checks decide which failures are fatal. On timeout the error built by
/// `on_timeout` is returned.
pub async fn poll_until<F, Fut, T>(
    timeout: Duration,
    poll_interval: Duration,
    on_timeout: T,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
    T: FnOnce() -> Error,
{
    let start = tokio::time::Instant::now();

    loop {
        if start.elapsed() > timeout {
            return Err(on_timeout());
        }

        if check_fn().await? {
            return Ok(());
        }
        trace!("Polling condition not yet met, retrying...");

        tokio::time::sleep(poll_interval).await;
    }
}

/// Create a kube client from an optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal("create_client", format!("failed to read kubeconfig: {}", e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal("create_client", format!("failed to load kubeconfig: {}", e))
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config)
        .map_err(|e| Error::internal("create_client", format!("failed to create client: {}", e)))
}
