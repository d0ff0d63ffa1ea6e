//! Distributed single-flight locks for cache recomputation.
//!
//! ## Protocol
//!
//! ```text
//! miss → SET lock:{key} {token} EX ttl NX
//!          ├─ acquired  → re-check cache → fetch → write → DEL-if-token
//!          ├─ contended → poll cache every retry_delay, up to max_retries
//!          │                 └─ exhausted → fetch directly
//!          └─ store down → fetch directly
//! ```
//!
//! The lock TTL bounds how long a crashed holder can block others; the token
//! comparison on release keeps a slow holder from deleting a lock that was
//! taken over after its own expired.

use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::client::{LockAttempt, StoreClient};
use super::key::lock_key;
use crate::config::StampedeConfig;
use crate::metrics;

/// Outcome of [`StampedeGuard::acquire`].
#[derive(Debug)]
pub enum Acquire {
    /// This caller owns the lock and must release it.
    Held(LockGuard),
    /// Another process is recomputing.
    Contended,
    /// The store could not be asked; proceed without coordination.
    Unavailable,
}

/// Ownership of one stampede lock.
#[derive(Debug)]
#[must_use = "a held lock must be released"]
pub struct LockGuard {
    key: String,
    token: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

#[derive(Clone)]
pub struct StampedeGuard {
    store: StoreClient,
    lock_ttl: Duration,
    retry_delay: Duration,
    max_retries: u32,
}

impl StampedeGuard {
    pub fn new(store: StoreClient, config: &StampedeConfig) -> Self {
        Self {
            store,
            lock_ttl: config.lock_ttl(),
            retry_delay: config.retry_delay(),
            max_retries: config.max_retries,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Try once to take the lock guarding `cache_key`.
    pub async fn acquire(&self, cache_key: &str) -> Acquire {
        let key = lock_key(cache_key);
        let token = Uuid::new_v4().to_string();
        match self.store.try_lock(&key, &token, self.lock_ttl).await {
            LockAttempt::Acquired => {
                debug!(key = %key, "stampede lock acquired");
                metrics::record_lock_acquired();
                Acquire::Held(LockGuard { key, token })
            }
            LockAttempt::Contended => {
                debug!(key = %key, "stampede lock contended");
                metrics::record_lock_contended();
                Acquire::Contended
            }
            LockAttempt::Unavailable => Acquire::Unavailable,
        }
    }

    /// Release `guard` if this holder still owns it.
    pub async fn release(&self, guard: LockGuard) {
        if !self.store.unlock(&guard.key, &guard.token).await {
            warn!(
                key = %guard.key,
                "stampede lock expired or taken over before release"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use std::sync::Arc;

    fn guard() -> (StoreClient, StampedeGuard) {
        let client = StoreClient::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        let guard = StampedeGuard::new(client.clone(), &StampedeConfig::default());
        (client, guard)
    }

    #[tokio::test]
    async fn second_acquire_is_contended() {
        let (_, guard) = guard();
        let held = match guard.acquire("orders:1").await {
            Acquire::Held(lock) => lock,
            other => panic!("expected lock, got {other:?}"),
        };
        assert_eq!(held.key(), "lock:orders:1");
        assert!(matches!(guard.acquire("orders:1").await, Acquire::Contended));

        guard.release(held).await;
        assert!(matches!(guard.acquire("orders:1").await, Acquire::Held(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_holder_does_not_release_new_owner() {
        let (client, guard) = guard();
        let stale = match guard.acquire("orders:1").await {
            Acquire::Held(lock) => lock,
            other => panic!("expected lock, got {other:?}"),
        };

        tokio::time::advance(Duration::from_secs(11)).await;
        let fresh = match guard.acquire("orders:1").await {
            Acquire::Held(lock) => lock,
            other => panic!("expected takeover, got {other:?}"),
        };

        guard.release(stale).await;
        assert_eq!(
            client.get_raw("lock:orders:1").await.as_deref(),
            Some(fresh.token())
        );
        guard.release(fresh).await;
        assert_eq!(client.get_raw("lock:orders:1").await, None);
    }
}
