//! JSON-level store access with graceful degradation.
//!
//! Every failure of the underlying [`Store`] is logged, counted and turned into
//! a miss (reads) or a no-op (writes, deletes, publishes). A store outage costs
//! latency, never correctness.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::store::{Store, Subscription};
use crate::metrics;

/// Raw token stored for "looked up, confirmed absent".
///
/// Not valid JSON, so no serialized value can collide with it.
pub const NULL_MARKER: &str = "__NULL__";

/// Result of reading a key that may hold a null marker.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheSlot<T> {
    /// Nothing stored, or the stored value could not be read.
    Miss,
    /// A null marker: the system of record has no value.
    Absent,
    Value(T),
}

impl<T> CacheSlot<T> {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheSlot::Miss)
    }

    /// Collapse to the caller-facing form: absent and miss both become `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheSlot::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    /// Another holder owns the lock.
    Contended,
    /// The store could not be asked.
    Unavailable,
}

/// Thin, cloneable wrapper over a [`Store`] that never fails.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn Store>,
    default_ttl: Duration,
}

impl StoreClient {
    pub fn new(store: Arc<dyn Store>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Raw value at `key`, `None` on miss or store failure.
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "store GET error");
                metrics::record_store_error("get");
                None
            }
        }
    }

    /// Read and decode `key`, distinguishing a null marker from a miss.
    pub async fn get_slot<T: DeserializeOwned>(&self, key: &str) -> CacheSlot<T> {
        match self.get_raw(key).await {
            Some(raw) => decode_slot(key, &raw),
            None => CacheSlot::Miss,
        }
    }

    /// Read and decode `key`. Null markers, misses and decode failures are all `None`.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_slot(key).await.into_option()
    }

    /// Encode and store `value`, using the default TTL when `ttl` is `None`.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to serialize cache value");
                metrics::record_store_error("serialize");
                return;
            }
        };
        self.set_raw(key, &payload, ttl.unwrap_or(self.default_ttl)).await;
    }

    /// Store the null marker at `key`.
    pub async fn set_null(&self, key: &str, ttl: Duration) {
        self.set_raw(key, NULL_MARKER, ttl).await;
    }

    pub async fn set_raw(&self, key: &str, payload: &str, ttl: Duration) {
        match self.store.set(key, payload, ttl).await {
            Ok(()) => debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set"),
            Err(e) => {
                warn!(key = %key, error = %e, "store SET error");
                metrics::record_store_error("set");
            }
        }
    }

    pub async fn del(&self, key: &str) -> u64 {
        match self.store.del(key).await {
            Ok(n) => n,
            Err(e) => {
                warn!(key = %key, error = %e, "store DEL error");
                metrics::record_store_error("del");
                0
            }
        }
    }

    /// Delete every key matching `pattern`. Returns the number removed (0 on failure).
    pub async fn scan_del(&self, pattern: &str) -> u64 {
        match self.store.scan_del(pattern).await {
            Ok(n) => n,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "store pattern DEL error");
                metrics::record_store_error("scan_del");
                0
            }
        }
    }

    pub async fn publish_json<T: Serialize + ?Sized>(&self, channel: &str, payload: &T) {
        let message = match serde_json::to_string(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(channel = %channel, error = %e, "failed to serialize pub/sub payload");
                metrics::record_store_error("serialize");
                return;
            }
        };
        if let Err(e) = self.store.publish(channel, &message).await {
            warn!(channel = %channel, error = %e, "store PUBLISH error");
            metrics::record_store_error("publish");
        }
    }

    /// Subscribe to `channel`; `None` if the store refused.
    pub async fn subscribe(&self, channel: &str) -> Option<Subscription> {
        match self.store.subscribe(channel).await {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!(channel = %channel, error = %e, "store SUBSCRIBE error");
                metrics::record_store_error("subscribe");
                None
            }
        }
    }

    /// `SET key token EX ttl NX`.
    pub async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> LockAttempt {
        match self.store.set_nx(key, token, ttl).await {
            Ok(true) => LockAttempt::Acquired,
            Ok(false) => LockAttempt::Contended,
            Err(e) => {
                warn!(key = %key, error = %e, "store lock error");
                metrics::record_store_error("lock");
                LockAttempt::Unavailable
            }
        }
    }

    /// Delete the lock at `key` only if it still carries `token`.
    pub async fn unlock(&self, key: &str, token: &str) -> bool {
        match self.store.del_if_eq(key, token).await {
            Ok(released) => released,
            Err(e) => {
                warn!(key = %key, error = %e, "store unlock error");
                metrics::record_store_error("unlock");
                false
            }
        }
    }

    pub async fn is_available(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}

pub(crate) fn decode_slot<T: DeserializeOwned>(key: &str, raw: &str) -> CacheSlot<T> {
    if raw == NULL_MARKER {
        return CacheSlot::Absent;
    }
    match serde_json::from_str(raw) {
        Ok(value) => CacheSlot::Value(value),
        Err(e) => {
            warn!(key = %key, error = %e, "failed to deserialize cached value");
            metrics::record_store_error("deserialize");
            CacheSlot::Miss
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::error::{StoreError, StoreResult};
    use async_trait::async_trait;
    use serde_json::json;

    /// Store whose every call fails, standing in for an unreachable server.
    struct DownStore;

    #[async_trait]
    impl Store for DownStore {
        async fn get(&self, _: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Connection("refused".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Duration) -> StoreResult<()> {
            Err(StoreError::Connection("refused".into()))
        }
        async fn set_nx(&self, _: &str, _: &str, _: Duration) -> StoreResult<bool> {
            Err(StoreError::Connection("refused".into()))
        }
        async fn del(&self, _: &str) -> StoreResult<u64> {
            Err(StoreError::Connection("refused".into()))
        }
        async fn del_if_eq(&self, _: &str, _: &str) -> StoreResult<bool> {
            Err(StoreError::Connection("refused".into()))
        }
        async fn scan_del(&self, _: &str) -> StoreResult<u64> {
            Err(StoreError::Connection("refused".into()))
        }
        async fn publish(&self, _: &str, _: &str) -> StoreResult<()> {
            Err(StoreError::Connection("refused".into()))
        }
        async fn subscribe(&self, _: &str) -> StoreResult<Subscription> {
            Err(StoreError::Connection("refused".into()))
        }
        async fn ping(&self) -> StoreResult<()> {
            Err(StoreError::Connection("refused".into()))
        }
        fn name(&self) -> &'static str {
            "down"
        }
        fn is_distributed(&self) -> bool {
            true
        }
    }

    fn memory_client() -> (MemoryStore, StoreClient) {
        let store = MemoryStore::new();
        let client = StoreClient::new(Arc::new(store.clone()), Duration::from_secs(60));
        (store, client)
    }

    #[tokio::test]
    async fn read_after_write() {
        let (_, client) = memory_client();
        client
            .set_json("orders:list:abc", &json!({"total": 5}), Some(Duration::from_secs(60)))
            .await;
        let value: Option<serde_json::Value> = client.get_json("orders:list:abc").await;
        assert_eq!(value, Some(json!({"total": 5})));
    }

    #[tokio::test]
    async fn null_marker_is_distinct_from_miss() {
        let (_, client) = memory_client();
        client.set_null("products:999", Duration::from_secs(10)).await;

        assert_eq!(client.get_slot::<u32>("products:999").await, CacheSlot::Absent);
        assert_eq!(client.get_slot::<u32>("products:1000").await, CacheSlot::Miss);
        assert_eq!(client.get_json::<u32>("products:999").await, None);
    }

    #[tokio::test]
    async fn malformed_json_is_a_miss() {
        let (store, client) = memory_client();
        store
            .set("orders:broken", "{not json", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(client.get_slot::<serde_json::Value>("orders:broken").await.is_miss());
    }

    #[tokio::test]
    async fn wrong_shape_is_a_miss() {
        let (_, client) = memory_client();
        client.set_json("orders:count", &"seven", None).await;
        assert_eq!(client.get_json::<u64>("orders:count").await, None);
    }

    #[tokio::test]
    async fn unreachable_store_degrades() {
        let client = StoreClient::new(Arc::new(DownStore), Duration::from_secs(60));

        client.set_json("k", &1u32, None).await;
        assert_eq!(client.get_json::<u32>("k").await, None);
        assert_eq!(client.del("k").await, 0);
        assert_eq!(client.scan_del("k:*").await, 0);
        client.publish_json("chan", &json!({"tag": "k"})).await;
        assert!(client.subscribe("chan").await.is_none());
        assert_eq!(
            client.try_lock("lock:k", "t", Duration::from_secs(1)).await,
            LockAttempt::Unavailable
        );
        assert!(!client.unlock("lock:k", "t").await);
        assert!(!client.is_available().await);
    }

    #[tokio::test]
    async fn lock_round_trip() {
        let (_, client) = memory_client();
        let ttl = Duration::from_secs(10);
        assert_eq!(client.try_lock("lock:a", "t1", ttl).await, LockAttempt::Acquired);
        assert_eq!(client.try_lock("lock:a", "t2", ttl).await, LockAttempt::Contended);
        assert!(!client.unlock("lock:a", "t2").await);
        assert!(client.unlock("lock:a", "t1").await);
        assert_eq!(client.try_lock("lock:a", "t2", ttl).await, LockAttempt::Acquired);
    }
}
