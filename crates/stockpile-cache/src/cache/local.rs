//! In-process L1 memoization tier.
//!
//! Holds short-lived copies of serialized store values so hot keys inside one
//! request burst skip the network round-trip. Entries are dropped by tag when
//! an invalidation event arrives, locally or from another instance.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::metrics;

/// A memoized store payload with TTL support.
///
/// The payload is wrapped in `Arc` so cache hits clone cheaply.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<str>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: &str, ttl: Duration) -> Self {
        Self {
            data: Arc::from(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

#[derive(Clone)]
pub struct LocalCache {
    entries: Arc<DashMap<String, CachedEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl LocalCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// A tier that never stores anything.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero() && self.max_entries > 0
    }

    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        let entry = self.entries.get(key)?;
        if !entry.is_expired() {
            return Some(Arc::clone(&entry.data));
        }
        drop(entry);
        self.entries.remove_if(key, |_, e| e.is_expired());
        None
    }

    /// Memoize `data`, living no longer than `ttl` or the tier's own TTL.
    pub fn insert(&self, key: &str, data: &str, ttl: Duration) {
        if !self.is_enabled() {
            return;
        }
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(key) {
            self.purge_expired();
            if self.entries.len() >= self.max_entries {
                tracing::debug!(key = %key, "L1 cache full, skipping insert");
                return;
            }
        }
        self.entries
            .insert(key.to_string(), CachedEntry::new(data, ttl.min(self.ttl)));
        metrics::set_cache_entries("L1", self.entries.len());
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every entry owned by `tag`: the key `tag` itself and keys under `tag:`.
    pub fn drop_tag(&self, tag: &str) -> usize {
        let before = self.entries.len();
        let nested = format!("{tag}:");
        self.entries
            .retain(|key, _| key != tag && !key.starts_with(&nested));
        let dropped = before.saturating_sub(self.entries.len());
        if dropped > 0 {
            tracing::debug!(tag = %tag, dropped, "L1 entries dropped");
            metrics::set_cache_entries("L1", self.entries.len());
        }
        dropped
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
