//! Read-only view of the Deployment cache.
//!
//! The cache itself is a kube-runtime reflector fed by the watch stream in
//! [`crate::watcher`]. The rest of the controller only sees the
//! [`DeploymentCache`] contract: point lookups plus a "synced" gate.

use crate::key::ReconcileKey;
use futures::FutureExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube_runtime::reflector::{ObjectRef, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lookup contract of the Deployment cache.
#[async_trait::async_trait]
pub trait DeploymentCache: Send + Sync {
    /// Current cached copy of the Deployment named by `key`.
    fn get(&self, key: &ReconcileKey) -> Option<Arc<Deployment>>;

    /// Whether the initial list has been fully applied.
    fn has_synced(&self) -> bool;

    /// Resolve once synced. Returns `false` if the cache can never sync
    /// because its feed is gone.
    async fn wait_synced(&self) -> bool;
}

/// [`DeploymentCache`] backed by a reflector store.
#[derive(Debug, Clone)]
pub struct StoreCache {
    store: Store<Deployment>,
}

impl StoreCache {
    /// Wrap the reader half of a reflector.
    #[must_use]
    pub fn new(store: Store<Deployment>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl DeploymentCache for StoreCache {
    fn get(&self, key: &ReconcileKey) -> Option<Arc<Deployment>> {
        self.store
            .get(&ObjectRef::new(key.name()).within(key.namespace()))
    }

    fn has_synced(&self) -> bool {
        matches!(self.store.wait_until_ready().now_or_never(), Some(Ok(())))
    }

    async fn wait_synced(&self) -> bool {
        self.store.wait_until_ready().await.is_ok()
    }
}

/// How the wait for the initial sync ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Cache holds a complete snapshot
    Synced,
    /// Timed out, or the feed went away first
    NotSynced,
    /// Shutdown was requested while waiting
    Shutdown,
}

/// Block until `cache` has synced, `timeout` elapses or `shutdown` fires.
pub async fn wait_for_cache_sync(
    cache: &dyn DeploymentCache,
    timeout: Duration,
    shutdown: &CancellationToken,
) -> SyncOutcome {
    tokio::select! {
        () = shutdown.cancelled() => SyncOutcome::Shutdown,
        res = tokio::time::timeout(timeout, cache.wait_synced()) => match res {
            Ok(true) => SyncOutcome::Synced,
            Ok(false) | Err(_) => SyncOutcome::NotSynced,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_deployment, MemoryCache};
    use kube_runtime::reflector::store;
    use kube_runtime::watcher;

    #[tokio::test]
    async fn test_store_cache_lookup_and_sync() {
        let (reader, mut writer) = store::<Deployment>();
        let cache = StoreCache::new(reader);
        assert!(!cache.has_synced());

        writer.apply_watcher_event(&watcher::Event::Init);
        writer.apply_watcher_event(&watcher::Event::InitApply(create_test_deployment(
            "default",
            "web",
            &[("app", "web")],
        )));
        writer.apply_watcher_event(&watcher::Event::InitDone);

        assert!(cache.has_synced());
        assert!(cache.wait_synced().await);
        let found = cache.get(&ReconcileKey::new("default", "web")).unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("web"));
        assert!(cache.get(&ReconcileKey::new("other", "web")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_cache_sync_times_out() {
        let cache = MemoryCache::new();
        let shutdown = CancellationToken::new();

        let outcome = wait_for_cache_sync(&cache, Duration::from_secs(30), &shutdown).await;
        assert_eq!(outcome, SyncOutcome::NotSynced);
    }

    #[tokio::test]
    async fn test_wait_for_cache_sync_observes_shutdown() {
        let cache = MemoryCache::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let outcome = wait_for_cache_sync(&cache, Duration::from_secs(30), &shutdown).await;
        assert_eq!(outcome, SyncOutcome::Shutdown);
    }

    #[tokio::test]
    async fn test_wait_for_cache_sync_synced() {
        let cache = MemoryCache::new();
        cache.mark_synced();
        let shutdown = CancellationToken::new();

        let outcome = wait_for_cache_sync(&cache, Duration::from_secs(30), &shutdown).await;
        assert_eq!(outcome, SyncOutcome::Synced);
    }
}
