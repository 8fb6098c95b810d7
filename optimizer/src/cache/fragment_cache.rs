//! Fragment cache: best-effort result reuse keyed by fingerprint.
//!
//! Every backend fault (unreachable store, timeout, corrupt entry) is
//! logged and reported to the caller as a plain miss. Nothing in this
//! module returns an error.
//!
//! Dependency invalidation uses a process-local reverse index
//! (`dependency key → fragment keys`) maintained on every write, so
//! `invalidate_by_dependency` touches only the affected fragments.
//!
//! Removals bump an epoch while holding the index write lock. A hit only
//! writes its updated record back if no removal happened since its read,
//! so an invalidated fragment is never resurrected by a racing lookup.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::fragment::Fragment;
use super::store::{CacheError, CacheStore};
use crate::clock::SharedClock;
use crate::fingerprint::{FragmentType, IdentifiedFragment};

/// Default bound on any single backend operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses caused by an entry past its TTL
    pub expired: u64,
    /// Backend faults recovered as misses or dropped writes
    pub errors: u64,
    pub writes: u64,
    pub invalidations: u64,
}

impl CacheStats {
    /// Hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct IndexedFragment {
    dependencies: Vec<String>,
    expires_at_ms: u64,
}

/// Reverse and forward dependency indexes.
#[derive(Debug, Default)]
struct DependencyIndex {
    by_dependency: HashMap<String, HashSet<String>>,
    by_fragment: HashMap<String, IndexedFragment>,
}

impl DependencyIndex {
    fn insert(&mut self, key: &str, dependencies: &[String], expires_at_ms: u64) {
        self.remove(key);
        if dependencies.is_empty() {
            return;
        }
        for dep in dependencies {
            self.by_dependency
                .entry(dep.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.by_fragment.insert(
            key.to_string(),
            IndexedFragment {
                dependencies: dependencies.to_vec(),
                expires_at_ms,
            },
        );
    }

    fn remove(&mut self, key: &str) {
        let Some(indexed) = self.by_fragment.remove(key) else {
            return;
        };
        for dep in indexed.dependencies {
            if let Some(keys) = self.by_dependency.get_mut(&dep) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_dependency.remove(&dep);
                }
            }
        }
    }

    fn affected(&self, changed: &[String]) -> BTreeSet<String> {
        changed
            .iter()
            .filter_map(|dep| self.by_dependency.get(dep))
            .flat_map(|keys| keys.iter().cloned())
            .collect()
    }

    fn prune_expired(&mut self, now_ms: u64) -> usize {
        let expired: Vec<String> = self
            .by_fragment
            .iter()
            .filter(|(_, f)| f.expires_at_ms <= now_ms)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

struct CacheInner {
    store: Arc<dyn CacheStore>,
    clock: SharedClock,
    op_timeout: Duration,
    index: RwLock<DependencyIndex>,
    /// Bumped under the index write lock on every eviction or invalidation
    removal_epoch: AtomicU64,
    counters: CacheCounters,
}

/// Fragment cache over an external [`CacheStore`].
///
/// Cheap to clone; clones share the store, index and counters.
#[derive(Clone)]
pub struct FragmentCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for FragmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentCache")
            .field("op_timeout", &self.inner.op_timeout)
            .field("stats", &self.stats())
            .finish()
    }
}

impl FragmentCache {
    pub fn new(store: Arc<dyn CacheStore>, clock: SharedClock) -> Self {
        Self::with_timeout(store, clock, DEFAULT_OPERATION_TIMEOUT)
    }

    pub fn with_timeout(store: Arc<dyn CacheStore>, clock: SharedClock, op_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                store,
                clock,
                op_timeout,
                index: RwLock::new(DependencyIndex::default()),
                removal_epoch: AtomicU64::new(0),
                counters: CacheCounters::default(),
            }),
        }
    }

    /// Look up a fragment. Any backend fault is a miss.
    pub async fn get(&self, key: &str) -> Option<Fragment> {
        let inner = &self.inner;
        let epoch = inner.removal_epoch.load(Ordering::Acquire);
        let raw = match self.bounded(inner.store.get(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache miss: {}", key);
                return None;
            }
            Err(e) => {
                inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Cache get failed for {}, treating as miss: {}", key, e);
                return None;
            }
        };

        let mut fragment: Fragment = match serde_json::from_str(&raw) {
            Ok(fragment) => fragment,
            Err(e) => {
                let err = CacheError::Malformed {
                    key: key.to_string(),
                    message: e.to_string(),
                };
                inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("{}; dropping entry", err);
                self.evict(key).await;
                return None;
            }
        };

        let now = inner.clock.now_millis();
        if fragment.is_expired(now) {
            inner.counters.expired.fetch_add(1, Ordering::Relaxed);
            inner.counters.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cache entry {} expired, not served", key);
            self.evict(key).await;
            return None;
        }

        fragment.touch(now);
        inner.counters.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Cache hit: {} (hits={})", key, fragment.hit_count);

        self.write_back(key, &fragment, now, epoch).await;
        Some(fragment)
    }

    /// Persist hit tracking; a failure here only loses the counter update.
    async fn write_back(&self, key: &str, fragment: &Fragment, now: u64, epoch: u64) {
        let inner = &self.inner;
        let encoded = match serde_json::to_string(fragment) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::debug!("Hit write-back encode failed for {}: {}", key, e);
                return;
            }
        };

        // Held across the write so no removal can interleave with it
        let _index = inner.index.read().await;
        if inner.removal_epoch.load(Ordering::Acquire) != epoch {
            tracing::debug!("Skipping hit write-back for {}: removed since read", key);
            return;
        }
        let remaining = fragment.remaining_ttl(now);
        if let Err(e) = self.bounded(inner.store.set(key, encoded, remaining)).await {
            tracing::debug!("Hit write-back failed for {}: {}", key, e);
        }
    }

    /// Concurrent lookups; result `i` corresponds to `keys[i]`.
    pub async fn get_many(&self, keys: &[String]) -> Vec<Option<Fragment>> {
        futures::future::join_all(keys.iter().map(|key| self.get(key))).await
    }

    /// Store a value. Returns whether the write reached the backend.
    pub async fn set(
        &self,
        key: &str,
        value: Value,
        fragment_type: FragmentType,
        ttl: Option<Duration>,
    ) -> bool {
        self.set_with_dependencies(key, value, fragment_type, ttl, Vec::new())
            .await
    }

    /// Store a value and index its declared dependencies.
    pub async fn set_with_dependencies(
        &self,
        key: &str,
        value: Value,
        fragment_type: FragmentType,
        ttl: Option<Duration>,
        dependencies: Vec<String>,
    ) -> bool {
        let inner = &self.inner;
        let ttl = ttl.unwrap_or_else(|| fragment_type.default_ttl());
        if ttl.as_millis() == 0 {
            tracing::debug!("Skipping cache write for {}: zero TTL", key);
            return false;
        }

        let now = inner.clock.now_millis();
        let fragment = Fragment::new(key, value, fragment_type, ttl, dependencies, now);
        let encoded = match serde_json::to_string(&fragment) {
            Ok(encoded) => encoded,
            Err(e) => {
                inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Failed to encode fragment {}: {}", key, e);
                return false;
            }
        };

        match self.bounded(inner.store.set(key, encoded, ttl)).await {
            Ok(()) => {
                inner
                    .index
                    .write()
                    .await
                    .insert(key, &fragment.dependencies, fragment.expires_at_ms());
                inner.counters.writes.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Cache set failed for {}, result not cached: {}", key, e);
                false
            }
        }
    }

    /// Store the computed value for an identified fragment. Uncacheable
    /// fragments are ignored.
    pub async fn store_fragment(&self, fragment: &IdentifiedFragment, value: Value) -> bool {
        if !fragment.is_cacheable() {
            return false;
        }
        self.set_with_dependencies(
            &fragment.key,
            value,
            fragment.fragment_type,
            Some(fragment.ttl),
            fragment.dependencies.clone(),
        )
        .await
    }

    /// Fire-and-forget write. The returned handle may be dropped.
    pub fn spawn_store(&self, fragment: IdentifiedFragment, value: Value) -> JoinHandle<bool> {
        let cache = self.clone();
        tokio::spawn(async move { cache.store_fragment(&fragment, value).await })
    }

    /// Remove every fragment that declared any of `changed` as a dependency.
    ///
    /// Returns the invalidated keys in sorted order.
    pub async fn invalidate_by_dependency(&self, changed: &[String]) -> Vec<String> {
        let inner = &self.inner;
        let affected = {
            let mut index = inner.index.write().await;
            let pruned = index.prune_expired(inner.clock.now_millis());
            if pruned > 0 {
                tracing::debug!("Pruned {} expired entries from dependency index", pruned);
            }
            let affected = index.affected(changed);
            for key in &affected {
                index.remove(key);
            }
            if !affected.is_empty() {
                inner.removal_epoch.fetch_add(1, Ordering::AcqRel);
            }
            affected
        };

        let keys: Vec<String> = affected.into_iter().collect();
        let deletes = keys.iter().map(|key| async move {
            if let Err(e) = self.bounded(inner.store.delete(key)).await {
                inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Cache delete failed for {}: {}", key, e);
            }
        });
        futures::future::join_all(deletes).await;

        inner
            .counters
            .invalidations
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        if !keys.is_empty() {
            tracing::info!(
                "Invalidated {} fragment(s) for {} changed dependency key(s)",
                keys.len(),
                changed.len()
            );
        }
        keys
    }

    /// Explicitly remove one fragment.
    pub async fn invalidate(&self, key: &str) {
        self.evict(key).await;
        self.inner
            .counters
            .invalidations
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Fragment keys currently indexed under a dependency.
    pub async fn dependents_of(&self, dependency: &str) -> Vec<String> {
        let index = self.inner.index.read().await;
        let mut keys: Vec<String> = index
            .by_dependency
            .get(dependency)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
        }
    }

    async fn evict(&self, key: &str) {
        {
            let mut index = self.inner.index.write().await;
            index.remove(key);
            self.inner.removal_epoch.fetch_add(1, Ordering::AcqRel);
        }
        if let Err(e) = self.bounded(self.inner.store.delete(key)).await {
            tracing::debug!("Cache delete failed for {}: {}", key, e);
        }
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: std::future::Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.inner.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.inner.op_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::InMemoryStore;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn cache_with_clock() -> (FragmentCache, Arc<InMemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let cache = FragmentCache::new(store.clone(), clock.clone());
        (cache, store, clock)
    }

    #[tokio::test]
    async fn test_set_then_get_tracks_hits() {
        let (cache, _, _) = cache_with_clock();
        assert!(
            cache
                .set("frag:summary:a", json!("text"), FragmentType::Summary, None)
                .await
        );
        let first = cache.get("frag:summary:a").await.unwrap();
        assert_eq!(first.hit_count, 1);
        let second = cache.get("frag:summary:a").await.unwrap();
        assert_eq!(second.hit_count, 2);
        assert_eq!(second.value, json!("text"));
        assert_eq!(second.ttl_ms, 1_800_000);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_miss_counts() {
        let (cache, _, _) = cache_with_clock();
        assert!(cache.get("nope").await.is_none());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hit_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_backend_error_is_miss() {
        let (cache, store, _) = cache_with_clock();
        cache
            .set("k", json!(1), FragmentType::Context, None)
            .await;
        store.set_failing(true);
        assert!(cache.get("k").await.is_none());
        assert!(!cache.set("k2", json!(2), FragmentType::Context, None).await);
        let stats = cache.stats();
        assert_eq!(stats.errors, 2);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_dropped() {
        let (cache, store, _) = cache_with_clock();
        store.insert_raw("bad", "{not json", Duration::from_secs(60)).await;
        assert!(cache.get("bad").await.is_none());
        assert!(store.get("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_explicit_ttl_not_served_after_expiry() {
        let (cache, _, clock) = cache_with_clock();
        cache
            .set("k", json!(1), FragmentType::CalculationResult, Some(Duration::from_secs(5)))
            .await;
        clock.advance(Duration::from_millis(4_999));
        assert!(cache.get("k").await.is_some());
        clock.advance(Duration::from_millis(1));
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.stats().expired, 0, "store already dropped the entry");
    }

    #[tokio::test]
    async fn test_zero_ttl_skipped() {
        let (cache, _, _) = cache_with_clock();
        assert!(
            !cache
                .set("k", json!(1), FragmentType::Context, Some(Duration::ZERO))
                .await
        );
    }

    #[tokio::test]
    async fn test_dependency_index_cleanup_on_overwrite() {
        let (cache, _, _) = cache_with_clock();
        cache
            .set_with_dependencies("k", json!(1), FragmentType::Aggregation, None, vec!["d1".into()])
            .await;
        cache
            .set_with_dependencies("k", json!(2), FragmentType::Aggregation, None, vec!["d2".into()])
            .await;
        assert!(cache.dependents_of("d1").await.is_empty());
        assert_eq!(cache.dependents_of("d2").await, vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_invalidate_single_key() {
        let (cache, _, _) = cache_with_clock();
        cache
            .set_with_dependencies("k", json!(1), FragmentType::Summary, None, vec!["d".into()])
            .await;
        cache.invalidate("k").await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.dependents_of("d").await.is_empty());
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_index_prunes_expired() {
        let (cache, _, clock) = cache_with_clock();
        cache
            .set_with_dependencies(
                "short",
                json!(1),
                FragmentType::DataFetch,
                Some(Duration::from_secs(1)),
                vec!["d".into()],
            )
            .await;
        clock.advance(Duration::from_secs(2));
        let invalidated = cache.invalidate_by_dependency(&["d".to_string()]).await;
        assert!(invalidated.is_empty());
    }

    /// Pauses the first armed `get` after its read, until released.
    struct PausingStore {
        inner: InMemoryStore,
        armed: std::sync::atomic::AtomicBool,
        read_done: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl CacheStore for PausingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            let raw = self.inner.get(key).await;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.read_done.notify_one();
                self.release.notified().await;
            }
            raw
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_invalidation_during_hit_is_not_undone() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(PausingStore {
            inner: InMemoryStore::with_clock(clock.clone()),
            armed: std::sync::atomic::AtomicBool::new(false),
            read_done: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let cache = FragmentCache::with_timeout(store.clone(), clock, Duration::from_secs(5));
        let deps = vec!["table:sales".to_string()];
        assert!(
            cache
                .set_with_dependencies(
                    "aggregation:q3",
                    json!({"total": 42}),
                    FragmentType::Aggregation,
                    None,
                    deps.clone(),
                )
                .await
        );

        store.armed.store(true, Ordering::SeqCst);
        let reader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("aggregation:q3").await })
        };
        store.read_done.notified().await;
        assert_eq!(cache.invalidate_by_dependency(&deps).await, vec!["aggregation:q3"]);
        store.release.notify_one();

        // The lookup read before the invalidation, so it may still answer
        assert!(reader.await.unwrap().is_some());
        assert!(store.inner.get("aggregation:q3").await.unwrap().is_none());
        assert!(cache.get("aggregation:q3").await.is_none());
    }
}
