//! TTL cache for list queries, partitioned by resource kind and scope key.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::structs::{NamespaceRecord, PodRecord};

/// Namespaces are not partitioned by scope; they always live under this key.
pub const CLUSTER_SCOPE: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pods,
    Namespaces,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pods => "pods",
            ResourceKind::Namespaces => "namespaces",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pods" => Ok(ResourceKind::Pods),
            "namespaces" => Ok(ResourceKind::Namespaces),
            other => Err(Error::CacheKey(other.to_string())),
        }
    }
}

/// `data` and `fetched_at` are always set or cleared together.
#[derive(Debug)]
struct CacheEntry<V> {
    data: Option<Arc<V>>,
    fetched_at: Option<Instant>,
    scope_key: Option<String>,
}

impl<V> Default for CacheEntry<V> {
    fn default() -> Self {
        Self {
            data: None,
            fetched_at: None,
            scope_key: None,
        }
    }
}

impl<V> CacheEntry<V> {
    fn valid_data(&self, scope_key: &str, ttl: Duration, now: Instant) -> Option<Arc<V>> {
        match (&self.data, self.fetched_at) {
            (Some(data), Some(fetched_at))
                if now.duration_since(fetched_at) < ttl
                    && self.scope_key.as_deref() == Some(scope_key) =>
            {
                Some(data.clone())
            }
            _ => None,
        }
    }

    fn store(&mut self, data: Arc<V>, scope_key: &str) {
        self.data = Some(data);
        self.fetched_at = Some(Instant::now());
        self.scope_key = Some(scope_key.to_string());
    }

    fn clear(&mut self) {
        self.data = None;
        self.fetched_at = None;
    }
}

/// One cache key. The entry lock is held across the fetch, so there is at most
/// one writer per key and readers wait for it instead of fetching twice.
#[derive(Debug)]
pub struct CacheSlot<V> {
    kind: ResourceKind,
    entry: Mutex<CacheEntry<V>>,
}

impl<V> CacheSlot<V> {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            entry: Mutex::new(CacheEntry::default()),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Returns the cached value when it is valid for `scope_key`, otherwise
    /// calls `fetch`. A failed fetch leaves the previous entry in place and
    /// hands the error back.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        scope_key: &str,
        ttl: Duration,
        force_refresh: bool,
        fetch: F,
    ) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let mut entry = self.entry.lock().await;

        if !force_refresh {
            if let Some(data) = entry.valid_data(scope_key, ttl, Instant::now()) {
                debug!(kind = self.kind.as_str(), scope = scope_key, "cache hit");
                return Ok(data);
            }
        }

        debug!(
            kind = self.kind.as_str(),
            scope = scope_key,
            force_refresh,
            "cache miss, fetching"
        );
        match fetch().await {
            Ok(value) => {
                let data = Arc::new(value);
                entry.store(data.clone(), scope_key);
                Ok(data)
            }
            Err(err) => {
                warn!(kind = self.kind.as_str(), scope = scope_key, error = %err, "fetch failed");
                Err(err)
            }
        }
    }

    /// Whatever was last stored for `scope_key`, ignoring the TTL.
    pub async fn stale(&self, scope_key: &str) -> Option<Arc<V>> {
        let entry = self.entry.lock().await;
        match &entry.data {
            Some(data) if entry.scope_key.as_deref() == Some(scope_key) => Some(data.clone()),
            _ => None,
        }
    }

    pub async fn invalidate(&self) {
        self.entry.lock().await.clear();
    }

    pub async fn is_populated(&self) -> bool {
        self.entry.lock().await.data.is_some()
    }
}

#[derive(Debug)]
pub struct ResourceCache {
    pub pods: CacheSlot<Vec<PodRecord>>,
    pub namespaces: CacheSlot<Vec<NamespaceRecord>>,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self {
            pods: CacheSlot::new(ResourceKind::Pods),
            namespaces: CacheSlot::new(ResourceKind::Namespaces),
        }
    }
}

impl ResourceCache {
    pub async fn invalidate(&self, kind: ResourceKind) {
        debug!(kind = kind.as_str(), "invalidating cache entry");
        match kind {
            ResourceKind::Pods => self.pods.invalidate().await,
            ResourceKind::Namespaces => self.namespaces.invalidate().await,
        }
    }

    pub async fn invalidate_named(&self, key: &str) -> Result<()> {
        let kind: ResourceKind = key.parse()?;
        self.invalidate(kind).await;
        Ok(())
    }

    pub async fn invalidate_all(&self) {
        self.pods.invalidate().await;
        self.namespaces.invalidate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(30);

    async fn fetch_counted(
        slot: &CacheSlot<Vec<String>>,
        scope: &str,
        force: bool,
        calls: &AtomicUsize,
    ) -> Result<Arc<Vec<String>>> {
        slot.get_or_fetch(scope, TTL, force, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(vec![format!("{scope}-{n}")])
        })
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_call_within_ttl_is_a_hit() {
        let slot = CacheSlot::new(ResourceKind::Pods);
        let calls = AtomicUsize::new(0);

        let first = fetch_counted(&slot, "current", false, &calls).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = fetch_counted(&slot, "current", false, &calls).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_refetched() {
        let slot = CacheSlot::new(ResourceKind::Pods);
        let calls = AtomicUsize::new(0);

        fetch_counted(&slot, "current", false, &calls).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        fetch_counted(&slot, "current", false, &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(21)).await;
        let third = fetch_counted(&slot, "current", false, &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(third.as_slice(), ["current-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_change_is_a_miss() {
        let slot = CacheSlot::new(ResourceKind::Pods);
        let calls = AtomicUsize::new(0);

        fetch_counted(&slot, "current", false, &calls).await.unwrap();
        let all = fetch_counted(&slot, "all", false, &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(all.as_slice(), ["all-2"]);

        // the entry now belongs to "all", so going back is another miss
        fetch_counted(&slot, "current", false, &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_bypasses_valid_entry() {
        let slot = CacheSlot::new(ResourceKind::Pods);
        let calls = AtomicUsize::new(0);

        fetch_counted(&slot, "current", false, &calls).await.unwrap();
        fetch_counted(&slot, "current", true, &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_is_idempotent_and_forces_fetch() {
        let slot = CacheSlot::new(ResourceKind::Namespaces);
        let calls = AtomicUsize::new(0);

        fetch_counted(&slot, CLUSTER_SCOPE, false, &calls).await.unwrap();
        slot.invalidate().await;
        slot.invalidate().await;
        assert!(!slot.is_populated().await);
        assert!(slot.stale(CLUSTER_SCOPE).await.is_none());

        fetch_counted(&slot, CLUSTER_SCOPE, false, &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_keeps_previous_entry() {
        let slot = CacheSlot::new(ResourceKind::Pods);
        let calls = AtomicUsize::new(0);
        fetch_counted(&slot, "current", false, &calls).await.unwrap();

        let err = slot
            .get_or_fetch("current", TTL, true, || async {
                Err::<Vec<String>, _>(Error::Connectivity("connection refused".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "connectivity");

        let stale = slot.stale("current").await.unwrap();
        assert_eq!(stale.as_slice(), ["current-1"]);
        assert!(slot.stale("all").await.is_none());

        // still valid, so a plain read is served without fetching
        fetch_counted(&slot, "current", false, &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_key_is_rejected() {
        let cache = ResourceCache::default();
        assert!(matches!(
            cache.invalidate_named("deployments").await,
            Err(Error::CacheKey(_))
        ));
        assert!(cache.invalidate_named("pods").await.is_ok());
    }

    #[tokio::test]
    async fn test_invalidate_all_clears_every_key() {
        let cache = ResourceCache::default();
        cache
            .pods
            .get_or_fetch("all", TTL, false, || async { Ok(Vec::new()) })
            .await
            .unwrap();
        cache
            .namespaces
            .get_or_fetch(CLUSTER_SCOPE, TTL, false, || async { Ok(Vec::new()) })
            .await
            .unwrap();

        cache.invalidate_all().await;
        cache.invalidate_all().await;
        assert!(!cache.pods.is_populated().await);
        assert!(!cache.namespaces.is_populated().await);
    }
}
