//! Tag invalidation and cross-instance coherence.
//!
//! ## Example Flow
//!
//! ```text
//! Instance 1: bus.invalidate("orders")
//!   ├─ drop L1 + SCAN/DEL orders, orders:*      → PUBLISH cache:invalidate {tag: orders}
//!   ├─ cascade (cascade=false): inventory       → PUBLISH cache:invalidate {tag: inventory}
//!   └─ cascade (cascade=false): dashboard       → PUBLISH cache:invalidate {tag: dashboard}
//!
//! Instance 2: listener receives each event → drops matching L1 entries only
//! ```
//!
//! Subscribers never re-publish or cascade, so events cannot loop between
//! instances. Delivery is best-effort and idempotent.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::StoreClient;
use super::local::LocalCache;
use super::tags::TagGraph;
use crate::metrics;

/// What an invalidation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateOptions {
    /// Clear shared store entries.
    #[serde(rename = "redis", default = "default_true")]
    pub store: bool,
    /// Tell other instances.
    #[serde(default = "default_true")]
    pub broadcast: bool,
    /// Also invalidate dependent tags.
    #[serde(default = "default_true")]
    pub cascade: bool,
}

fn default_true() -> bool {
    true
}

impl Default for InvalidateOptions {
    fn default() -> Self {
        Self {
            store: true,
            broadcast: true,
            cascade: true,
        }
    }
}

impl InvalidateOptions {
    /// Drop only this process's L1 copies.
    pub fn local_only() -> Self {
        Self {
            store: false,
            broadcast: false,
            cascade: false,
        }
    }

    pub fn without_cascade(mut self) -> Self {
        self.cascade = false;
        self
    }

    pub fn without_broadcast(mut self) -> Self {
        self.broadcast = false;
        self
    }
}

/// Message published on the invalidation channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    pub tag: String,
    pub options: InvalidateOptions,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_instance_id: Option<String>,
}

impl InvalidationEvent {
    pub fn new(tag: impl Into<String>, options: InvalidateOptions, source: Option<String>) -> Self {
        Self {
            tag: tag.into(),
            options,
            timestamp: unix_millis(),
            source_instance_id: source,
        }
    }
}

pub(crate) fn unix_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// What one `invalidate` call cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Cleared tags in order: the requested tag first, then its dependents.
    pub tags: Vec<String>,
    /// Store keys removed across all tags.
    pub keys_deleted: u64,
}

impl InvalidationReport {
    fn merge(&mut self, other: InvalidationReport) {
        self.tags.extend(other.tags);
        self.keys_deleted += other.keys_deleted;
    }
}

#[derive(Clone)]
pub struct InvalidationBus {
    store: StoreClient,
    graph: Arc<TagGraph>,
    local: LocalCache,
    channel: String,
    instance_id: String,
}

impl InvalidationBus {
    pub fn new(
        store: StoreClient,
        graph: Arc<TagGraph>,
        local: LocalCache,
        channel: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            graph,
            local,
            channel: channel.into(),
            instance_id: instance_id.into(),
        }
    }

    pub fn graph(&self) -> &TagGraph {
        &self.graph
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Invalidate `tag` and, when `opts.cascade`, every dependent tag once.
    pub async fn invalidate(&self, tag: &str, opts: InvalidateOptions) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        report.keys_deleted += self.clear(tag, opts).await;
        report.tags.push(tag.to_string());

        if opts.cascade {
            let dependent_opts = InvalidateOptions {
                cascade: false,
                ..opts
            };
            for dependent in self.graph.dependents(tag) {
                report.keys_deleted += self.clear(&dependent, dependent_opts).await;
                report.tags.push(dependent);
            }
        }

        debug!(
            tag = %tag,
            cleared = ?report.tags,
            keys_deleted = report.keys_deleted,
            "invalidation complete"
        );
        report
    }

    /// Invalidate each tag independently; no ordering or atomicity across tags.
    pub async fn invalidate_many<S: AsRef<str>>(
        &self,
        tags: &[S],
        opts: InvalidateOptions,
    ) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        for tag in tags {
            report.merge(self.invalidate(tag.as_ref(), opts).await);
        }
        report
    }

    /// Apply an event received from another instance: local drop only.
    pub fn apply_remote(&self, event: &InvalidationEvent) -> usize {
        self.drop_local(&event.tag)
    }

    /// Invalidate one tag without cascading. Returns store keys deleted.
    async fn clear(&self, tag: &str, opts: InvalidateOptions) -> u64 {
        self.drop_local(tag);
        metrics::record_invalidation(tag);

        let mut deleted = 0;
        if opts.store {
            for scope in self.graph.key_scopes(tag) {
                deleted += self.store.del(&scope.exact).await;
                deleted += self.store.scan_del(&scope.pattern).await;
            }
        }

        if opts.broadcast {
            let event = InvalidationEvent::new(tag, opts, Some(self.instance_id.clone()));
            self.store.publish_json(&self.channel, &event).await;
        }
        deleted
    }

    fn drop_local(&self, tag: &str) -> usize {
        self.graph
            .namespaces(tag)
            .iter()
            .map(|ns| self.local.drop_tag(ns))
            .sum()
    }
}

/// Long-lived subscriber applying remote invalidations to this instance's L1.
///
/// Reconnects with exponential backoff if the subscription drops.
pub struct InvalidationListener {
    bus: InvalidationBus,
    shutdown: watch::Receiver<bool>,
}

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

impl InvalidationListener {
    pub fn new(bus: InvalidationBus, shutdown: watch::Receiver<bool>) -> Self {
        Self { bus, shutdown }
    }

    /// Spawn the listener task.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.listen(&mut backoff).await {
                Ok(()) => break,
                Err(e) => {
                    error!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Cache invalidation listener error, reconnecting..."
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.shutdown.changed() => break,
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        info!("Cache invalidation listener stopped");
    }

    /// Process events until shutdown (`Ok`) or connection loss (`Err`).
    ///
    /// A successful subscribe resets `backoff`.
    async fn listen(&mut self, backoff: &mut Duration) -> Result<(), String> {
        let channel = self.bus.channel().to_string();
        let mut subscription = self
            .bus
            .store
            .subscribe(&channel)
            .await
            .ok_or_else(|| format!("failed to subscribe to {channel}"))?;

        info!(channel = %channel, "Subscribed to cache invalidation channel");
        *backoff = INITIAL_BACKOFF;

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return Ok(());
                    }
                }
                message = subscription.next_message() => match message {
                    Some(payload) => self.handle(&payload),
                    None => return Err("pub/sub connection closed".to_string()),
                },
            }
        }
    }

    fn handle(&self, payload: &str) {
        match serde_json::from_str::<InvalidationEvent>(payload) {
            Ok(event) => {
                if event.source_instance_id.as_deref() == Some(self.bus.instance_id()) {
                    return;
                }
                let dropped = self.bus.apply_remote(&event);
                debug!(tag = %event.tag, dropped, "received cache invalidation");
            }
            Err(e) => {
                warn!(error = %e, payload = %payload, "failed to parse invalidation message payload");
            }
        }
    }
}
