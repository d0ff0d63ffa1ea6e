//! Get-or-compute entry points used by data-access code.
//!
//! ## Lookup Order
//!
//! ```text
//! get_or_compute → L1 (LocalCache) → L2 (Store) → fetcher (system of record)
//!                      ↓                 ↓              ↓
//!                  in-process        shared store   jittered write-back
//! ```
//!
//! A fetcher that returns `None` leaves a null marker behind (unless the call
//! opts out), so lookups for things that do not exist stop reaching the
//! system of record until the marker expires. Fetcher errors are returned to
//! the caller unchanged and nothing is cached for them.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::client::{CacheSlot, NULL_MARKER, StoreClient, decode_slot};
use super::jitter::jitter;
use super::key::{build_key, entity_key};
use super::local::LocalCache;
use super::lock::{Acquire, StampedeGuard};
use crate::config::CacheConfig;
use crate::metrics;

/// Per-call policy for [`TieredCache::get_or_compute_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeOptions {
    /// TTL before jitter; the configured default when `None`.
    pub ttl: Option<Duration>,
    /// Cache "no value" results behind a null marker.
    pub cache_null: bool,
    /// Coordinate recomputation across processes with a lock.
    pub stampede: bool,
    /// Randomize the TTL.
    pub jitter: bool,
}

impl Default for ComputeOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            cache_null: true,
            stampede: false,
            jitter: true,
        }
    }
}

impl ComputeOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn guarded(mut self) -> Self {
        self.stampede = true;
        self
    }

    /// Every miss goes to the system of record, even for absent values.
    pub fn without_null_cache(mut self) -> Self {
        self.cache_null = false;
        self
    }

    pub fn exact_ttl(mut self) -> Self {
        self.jitter = false;
        self
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub l1_entries: usize,
    pub mode: String,
}

/// Two-tier cache facade: L1 (in-process) over L2 (shared store).
#[derive(Clone)]
pub struct TieredCache {
    store: StoreClient,
    local: LocalCache,
    guard: StampedeGuard,
    default_ttl: Duration,
    null_ttl: Duration,
    jitter_percent: u32,
}

impl TieredCache {
    pub fn new(
        store: StoreClient,
        local: LocalCache,
        guard: StampedeGuard,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            local,
            guard,
            default_ttl: config.default_ttl(),
            null_ttl: config.null_ttl(),
            jitter_percent: config.jitter_percent,
        }
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    pub fn store(&self) -> &StoreClient {
        &self.store
    }

    /// Key for an entity addressed by identifier.
    pub fn entity_key(namespace: &str, id: impl std::fmt::Display) -> String {
        entity_key(namespace, id)
    }

    /// Pure cache read. `None` covers both "absent" and "not cached";
    /// callers that need the difference track it themselves.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key, true).await.into_option()
    }

    /// Write `value` through both tiers. The entry expires exactly after
    /// `ttl` (or the default TTL); only computed write-backs are jittered.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let opts = ComputeOptions {
            ttl,
            jitter: false,
            ..ComputeOptions::default()
        };
        self.store_value(key, value, opts).await;
    }

    async fn store_value<T: Serialize + ?Sized>(&self, key: &str, value: &T, opts: ComputeOptions) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to serialize cache value");
                metrics::record_store_error("serialize");
                return;
            }
        };
        let base = opts.ttl.unwrap_or(self.default_ttl);
        let ttl = if opts.jitter {
            jitter(base, self.jitter_percent)
        } else {
            base
        };
        self.store.set_raw(key, &payload, ttl).await;
        self.local.insert(key, &payload, ttl);
    }

    /// Drop `key` from both tiers. Does not broadcast.
    pub async fn delete(&self, key: &str) {
        self.local.remove(key);
        self.store.del(key).await;
    }

    /// Get `key`, computing and caching it with `fetcher` on a miss.
    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Option<Duration>,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let opts = ComputeOptions {
            ttl,
            ..ComputeOptions::default()
        };
        self.get_or_compute_with(key, fetcher, opts).await
    }

    /// [`Self::get_or_compute`] with at most one fetch in flight per key across processes.
    pub async fn get_or_compute_guarded<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Option<Duration>,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let opts = ComputeOptions {
            ttl,
            stampede: true,
            ..ComputeOptions::default()
        };
        self.get_or_compute_with(key, fetcher, opts).await
    }

    /// Get-or-compute under a key derived from `namespace` and query `params`.
    ///
    /// Invalidating the tag `namespace` (or any prefix tag of it) clears the entry.
    pub async fn get_or_compute_tagged<P, T, F, Fut, E>(
        &self,
        namespace: &str,
        params: &P,
        fetcher: F,
        opts: ComputeOptions,
    ) -> Result<Option<T>, E>
    where
        P: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let key = build_key(namespace, params);
        self.get_or_compute_with(&key, fetcher, opts).await
    }

    pub async fn get_or_compute_with<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        opts: ComputeOptions,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        match self.lookup(key, opts.cache_null).await {
            CacheSlot::Value(value) => return Ok(Some(value)),
            CacheSlot::Absent => return Ok(None),
            CacheSlot::Miss => {}
        }

        if opts.stampede {
            self.compute_guarded(key, fetcher, opts).await
        } else {
            self.fetch_and_store(key, fetcher, opts).await
        }
    }

    async fn compute_guarded<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        opts: ComputeOptions,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        match self.guard.acquire(key).await {
            Acquire::Held(lock) => {
                // Another process may have filled the key between our miss and the lock.
                let result = match self.lookup(key, opts.cache_null).await {
                    CacheSlot::Value(value) => Ok(Some(value)),
                    CacheSlot::Absent => Ok(None),
                    CacheSlot::Miss => self.fetch_and_store(key, fetcher, opts).await,
                };
                self.guard.release(lock).await;
                result
            }
            Acquire::Contended => {
                for _ in 0..self.guard.max_retries() {
                    tokio::time::sleep(self.guard.retry_delay()).await;
                    match self.lookup(key, opts.cache_null).await {
                        CacheSlot::Value(value) => return Ok(Some(value)),
                        CacheSlot::Absent => return Ok(None),
                        CacheSlot::Miss => {}
                    }
                }
                warn!(key = %key, "stampede wait exhausted, fetching directly");
                metrics::record_lock_fallback();
                self.fetch_and_store(key, fetcher, opts).await
            }
            Acquire::Unavailable => self.fetch_and_store(key, fetcher, opts).await,
        }
    }

    async fn fetch_and_store<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        opts: ComputeOptions,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        metrics::record_fetch();
        let value = fetcher().await?;
        match &value {
            Some(v) => self.store_value(key, v, opts).await,
            None if opts.cache_null => {
                debug!(key = %key, "caching null marker");
                self.store.set_null(key, self.null_ttl).await;
                self.local.insert(key, NULL_MARKER, self.null_ttl);
            }
            None => {}
        }
        Ok(value)
    }

    /// L1, then L2 with promotion. Null markers read as a miss when
    /// `honour_null` is false.
    ///
    /// The store does not report remaining TTL, so a promoted entry lives in
    /// L1 for the local tier TTL at most and may outlive its L2 copy by that much.
    async fn lookup<T: DeserializeOwned>(&self, key: &str, honour_null: bool) -> CacheSlot<T> {
        if let Some(raw) = self.local.get(key) {
            match decode(key, &raw, honour_null) {
                CacheSlot::Miss => self.local.remove(key),
                slot => {
                    debug!(key = %key, "cache hit (L1)");
                    metrics::record_cache_hit("L1");
                    return slot;
                }
            }
        }

        let Some(raw) = self.store.get_raw(key).await else {
            debug!(key = %key, "cache miss");
            metrics::record_cache_miss();
            return CacheSlot::Miss;
        };

        let slot = decode(key, &raw, honour_null);
        match &slot {
            CacheSlot::Value(_) => {
                debug!(key = %key, "cache hit (L2)");
                metrics::record_cache_hit("L2");
                self.local.insert(key, &raw, self.default_ttl);
            }
            CacheSlot::Absent => {
                debug!(key = %key, "null marker hit");
                metrics::record_null_hit();
                self.local.insert(key, &raw, self.null_ttl);
            }
            CacheSlot::Miss => metrics::record_cache_miss(),
        }
        slot
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            l1_entries: self.local.len(),
            mode: self.store.store().name().to_string(),
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str, honour_null: bool) -> CacheSlot<T> {
    match decode_slot(key, raw) {
        CacheSlot::Absent if !honour_null => CacheSlot::Miss,
        slot => slot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, Store};
    use crate::config::StampedeConfig;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        total: i64,
    }

    fn cache_over(store: MemoryStore, stampede: StampedeConfig) -> TieredCache {
        let config = CacheConfig::default();
        let client = StoreClient::new(Arc::new(store), config.default_ttl());
        TieredCache::new(
            client.clone(),
            LocalCache::new(config.local_ttl(), 100),
            StampedeGuard::new(client, &stampede),
            &config,
        )
    }

    fn cache() -> (MemoryStore, TieredCache) {
        let store = MemoryStore::new();
        (store.clone(), cache_over(store, StampedeConfig::default()))
    }

    #[tokio::test]
    async fn hit_skips_fetcher() {
        let (_, cache) = cache();
        let calls = AtomicUsize::new(0);
        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(Some(Order { id: 1, total: 5 }))
        };

        let first = cache.get_or_compute("orders:1", fetch, None).await.unwrap();
        let second = cache.get_or_compute("orders:1", fetch, None).await.unwrap();
        assert_eq!(first, Some(Order { id: 1, total: 5 }));
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetcher_error_propagates_and_is_not_cached() {
        let (store, cache) = cache();
        let result: Result<Option<Order>, String> = cache
            .get_or_compute("orders:2", || async { Err("db down".to_string()) }, None)
            .await;
        assert_eq!(result, Err("db down".to_string()));
        assert_eq!(store.get("orders:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn null_cache_opt_out_always_fetches() {
        let (store, cache) = cache();
        let calls = AtomicUsize::new(0);
        let opts = ComputeOptions::default().without_null_cache();
        for _ in 0..3 {
            let value: Option<Order> = cache
                .get_or_compute_with(
                    "orders:404",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>(None)
                    },
                    opts,
                )
                .await
                .unwrap();
            assert_eq!(value, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.get("orders:404").await.unwrap(), None);
    }

    #[tokio::test]
    async fn l2_hit_is_promoted_to_l1() {
        let (store, cache) = cache();
        store
            .set("orders:3", r#"{"id":3,"total":9}"#, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get::<Order>("orders:3").await, Some(Order { id: 3, total: 9 }));
        assert!(cache.local().get("orders:3").is_some());
    }

    #[tokio::test]
    async fn tagged_key_is_shared_by_equivalent_queries() {
        let (_, cache) = cache();
        let calls = AtomicUsize::new(0);
        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(Some(vec![1, 2, 3]))
        };
        let a = serde_json::json!({"page": 1, "status": "open"});
        let b = serde_json::json!({"status": "open", "page": 1, "q": ""});

        cache
            .get_or_compute_tagged("orders:list", &a, fetch, ComputeOptions::default())
            .await
            .unwrap();
        let hit = cache
            .get_or_compute_tagged("orders:list", &b, fetch, ComputeOptions::default())
            .await
            .unwrap();
        assert_eq!(hit, Some(vec![1, 2, 3]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_set_expires_at_its_ttl() {
        let (store, cache) = cache();
        for i in 0..50 {
            cache
                .set(&format!("orders:{i}"), &5u32, Some(Duration::from_secs(60)))
                .await;
        }

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.len(), 50);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.len(), 0);
        assert_eq!(cache.get::<u32>("orders:7").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn exact_ttl_compute_is_not_jittered() {
        let (store, cache) = cache();
        let opts = ComputeOptions::default()
            .with_ttl(Duration::from_secs(60))
            .exact_ttl();
        for i in 0..50 {
            cache
                .get_or_compute_with(
                    &format!("orders:{i}"),
                    || async { Ok::<_, String>(Some(1u8)) },
                    opts,
                )
                .await
                .unwrap();
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn promoted_entry_is_bounded_by_local_ttl() {
        let (store, cache) = cache();
        store
            .set("orders:8", "{\"id\":8,\"total\":1}", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(cache.get::<Order>("orders:8").await.is_some());
        assert_eq!(cache.local().len(), 1);

        // L2 copy is gone; the L1 copy survives no longer than the local TTL.
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get::<Order>("orders:8").await, None);
    }

    #[tokio::test]
    async fn contended_lock_falls_back_to_direct_fetch() {
        let store = MemoryStore::new();
        let stampede = StampedeConfig {
            lock_ttl_secs: 10,
            retry_delay_ms: 5,
            max_retries: 3,
        };
        let cache = cache_over(store.clone(), stampede);

        // A holder that never finishes.
        store
            .set_nx("lock:orders:6", "crashed-holder", Duration::from_secs(10))
            .await
            .unwrap();

        let calls = AtomicUsize::new(0);
        let value = cache
            .get_or_compute_guarded(
                "orders:6",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(Some(Order { id: 6, total: 1 }))
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(value, Some(Order { id: 6, total: 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The foreign lock is left alone.
        assert_eq!(
            store.get("lock:orders:6").await.unwrap().as_deref(),
            Some("crashed-holder")
        );
    }

    #[tokio::test]
    async fn lock_is_released_after_fetch_error() {
        let (store, cache) = cache();
        let result: Result<Option<Order>, &str> = cache
            .get_or_compute_guarded("orders:7", || async { Err("boom") }, None)
            .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(store.get("lock:orders:7").await.unwrap(), None);
    }

    #[tokio::test]
    async fn stats_report_mode() {
        let (_, cache) = cache();
        cache.set("orders:8", &1u8, None).await;
        let stats = cache.stats();
        assert_eq!(stats.mode, "memory");
        assert_eq!(stats.l1_entries, 1);
    }
}
