//! The shared key-value store capability.
//!
//! Everything the engine needs from the store (values, locks, pub/sub) goes
//! through [`Store`]. Implementations return raw errors; [`super::StoreClient`]
//! is the boundary that turns them into misses and no-ops.

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::time::Duration;

use crate::error::StoreResult;

/// Key-value store with TTLs, set-if-absent, pattern deletion and pub/sub.
#[async_trait]
pub trait Store: Send + Sync {
    /// Get the raw value stored at `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store `value` at `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Store `value` only if `key` is absent. Returns `true` if written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete `key`. Returns the number of keys removed.
    async fn del(&self, key: &str) -> StoreResult<u64>;

    /// Atomically delete `key` if its current value equals `expected`.
    async fn del_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Delete every key matching a glob `pattern` without blocking the store.
    async fn scan_del(&self, pattern: &str) -> StoreResult<u64>;

    /// Publish `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()>;

    /// Subscribe to `channel`. The subscription owns its connection.
    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;

    async fn ping(&self) -> StoreResult<()>;

    /// Provider name for logs and health output.
    fn name(&self) -> &'static str;

    /// Whether state is shared with other processes.
    fn is_distributed(&self) -> bool;

    /// Drop expired entries; called by the background cleanup task.
    ///
    /// No-op for stores with native TTL such as Redis.
    fn cleanup_expired(&self) -> usize {
        0
    }
}

/// Stream of payloads received on one channel.
///
/// Dropping the subscription releases the underlying connection.
pub struct Subscription {
    channel: String,
    messages: BoxStream<'static, String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, messages: BoxStream<'static, String>) -> Self {
        Self {
            channel: channel.into(),
            messages,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next payload. `None` means the connection closed.
    pub async fn next_message(&mut self) -> Option<String> {
        self.messages.next().await
    }

    pub fn into_stream(self) -> BoxStream<'static, String> {
        self.messages
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish()
    }
}

/// Whole seconds for store TTL arguments, never below one.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
