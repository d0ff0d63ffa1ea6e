//! Explicit lifecycle for the cache engine.
//!
//! One [`CacheSystem`] per process owns the store connection, the tiered
//! accessor and the invalidation bus, plus two background tasks: the
//! invalidation listener and the expired-entry sweeper.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{
    InvalidateOptions, InvalidationBus, InvalidationListener, InvalidationReport, LocalCache,
    MemoryStore, RedisStore, StampedeGuard, Store, StoreClient, TagGraph, TagGraphError,
    TieredCache,
};
use crate::config::{CacheSettings, InvalidationConfig, RedisConfig};
use crate::error::CacheSystemError;
use crate::events::{DomainEvent, EventPublisher};

pub struct CacheSystem {
    store: Arc<dyn Store>,
    cache: TieredCache,
    bus: InvalidationBus,
    events: EventPublisher,
    instance_id: String,
    cleanup_interval: Duration,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheSystem {
    /// Build the engine from settings, connecting to Redis when enabled.
    ///
    /// An unreachable Redis is not an error: the engine falls back to an
    /// in-process store and runs single-instance.
    pub async fn connect(settings: &CacheSettings) -> Result<Self, CacheSystemError> {
        settings.validate().map_err(CacheSystemError::Config)?;
        let store = create_store(&settings.redis).await;
        Self::with_store(store, settings)
    }

    /// Build the engine over an existing store.
    pub fn with_store(
        store: Arc<dyn Store>,
        settings: &CacheSettings,
    ) -> Result<Self, CacheSystemError> {
        let graph = Arc::new(build_graph(&settings.invalidation)?);
        let client = StoreClient::new(Arc::clone(&store), settings.cache.default_ttl());
        let local = LocalCache::new(settings.cache.local_ttl(), settings.cache.local_max_entries);
        let guard = StampedeGuard::new(client.clone(), &settings.stampede);
        let instance_id = Uuid::new_v4().to_string();

        let cache = TieredCache::new(client.clone(), local.clone(), guard, &settings.cache);
        let bus = InvalidationBus::new(
            client.clone(),
            graph,
            local,
            settings.invalidation.channel.clone(),
            instance_id.clone(),
        );
        let (shutdown, _) = watch::channel(false);

        info!(
            store = store.name(),
            instance_id = %instance_id,
            "cache system ready"
        );

        Ok(Self {
            store,
            cache,
            bus,
            events: EventPublisher::new(client),
            instance_id,
            cleanup_interval: settings.cache.cleanup_interval(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the invalidation listener and the cleanup task. Calling it
    /// again is a no-op.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        tasks.push(InvalidationListener::new(self.bus.clone(), self.shutdown.subscribe()).start());
        tasks.push(self.start_cleanup_task());
    }

    /// Stop the background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "cache background task failed");
            }
        }
    }

    /// Periodically drop expired entries from the store and the local tier.
    fn start_cleanup_task(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let local = self.cache.local().clone();
        let mut shutdown = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.cleanup_interval);

        tokio::spawn(async move {
            while !*shutdown.borrow() {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {
                        let removed = store.cleanup_expired() + local.purge_expired();
                        if removed > 0 {
                            debug!(removed, "cleaned up expired cache entries");
                        }
                    }
                }
            }
            debug!("cache cleanup task stopped");
        })
    }

    /// Invalidate every tag the mutation touches, then publish the event.
    pub async fn record_mutation<E: DomainEvent>(&self, event: &E) -> InvalidationReport {
        let tags = event.affected_tags();
        let report = self
            .bus
            .invalidate_many(&tags, InvalidateOptions::default())
            .await;
        self.events.publish(event).await;
        report
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_distributed(&self) -> bool {
        self.store.is_distributed()
    }
}

/// Create the shared store based on configuration.
///
/// ## Store Modes
///
/// - **Redis disabled**: in-process [`MemoryStore`]
/// - **Redis enabled**: connects and pings Redis, falls back to memory on failure
pub async fn create_store(config: &RedisConfig) -> Arc<dyn Store> {
    if !config.enabled {
        info!("Redis disabled, using in-process store");
        return Arc::new(MemoryStore::new());
    }

    match RedisStore::connect(config).await {
        Ok(store) => {
            info!("✓ Connected to Redis successfully");
            Arc::new(store)
        }
        Err(e) => {
            warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-process store."
            );
            Arc::new(MemoryStore::new())
        }
    }
}

/// Tag graph from configuration; the built-in ERP table when no cascade rules are set.
pub fn build_graph(config: &InvalidationConfig) -> Result<TagGraph, TagGraphError> {
    let mut builder = if config.cascade.is_empty() {
        TagGraph::erp_builder()
    } else {
        config
            .cascade
            .iter()
            .fold(TagGraph::builder(), |b, (from, to)| b.cascade(from, to.iter().cloned()))
    };
    for (tag, namespaces) in &config.namespaces {
        for ns in namespaces {
            builder = builder.owns(tag.as_str(), ns.as_str());
        }
    }
    builder
        .mode(config.cascade_mode)
        .allow_cycles(config.allow_cycles)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CascadeMode;
    use crate::events::OrderEvent;
    use futures_util::StreamExt;
    use std::collections::BTreeMap;

    fn system_over(store: &MemoryStore) -> CacheSystem {
        CacheSystem::with_store(Arc::new(store.clone()), &CacheSettings::default()).unwrap()
    }

    #[test]
    fn default_graph_is_the_erp_table() {
        let graph = build_graph(&InvalidationConfig::default()).unwrap();
        assert_eq!(graph.dependents("orders"), vec!["inventory", "dashboard", "finance"]);
        assert_eq!(graph.namespaces("dashboard"), vec!["dashboard", "stats"]);
    }

    #[test]
    fn configured_graph_replaces_default() {
        let config = InvalidationConfig {
            cascade: BTreeMap::from([("a".to_string(), vec!["b".to_string()])]),
            namespaces: BTreeMap::from([("b".to_string(), vec!["b_view".to_string()])]),
            cascade_mode: CascadeMode::OneHop,
            ..InvalidationConfig::default()
        };
        let graph = build_graph(&config).unwrap();
        assert_eq!(graph.dependents("a"), vec!["b"]);
        assert!(graph.dependents("orders").is_empty());
        assert_eq!(graph.namespaces("b"), vec!["b_view"]);
    }

    #[test]
    fn configured_cycle_is_rejected() {
        let config = InvalidationConfig {
            cascade: BTreeMap::from([
                ("a".to_string(), vec!["b".to_string()]),
                ("b".to_string(), vec!["a".to_string()]),
            ]),
            ..InvalidationConfig::default()
        };
        assert!(matches!(build_graph(&config), Err(TagGraphError::Cycle(_))));
    }

    #[tokio::test]
    async fn connect_without_redis_is_local() {
        let system = CacheSystem::connect(&CacheSettings::default()).await.unwrap();
        assert!(!system.is_distributed());
        assert_eq!(system.store().name(), "memory");
    }

    #[tokio::test]
    async fn connect_rejects_invalid_settings() {
        let mut settings = CacheSettings::default();
        settings.cache.default_ttl_secs = 0;
        assert!(matches!(
            CacheSystem::connect(&settings).await,
            Err(CacheSystemError::Config(_))
        ));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_shutdown_joins() {
        let system = system_over(&MemoryStore::new());
        system.start().await;
        system.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        system.shutdown().await;
        assert!(system.tasks.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_frees_expired_entries() {
        let store = MemoryStore::new();
        let system = system_over(&store);
        for i in 0..1000 {
            store
                .set(&format!("orders:{i}"), "__NULL__", Duration::from_secs(10))
                .await
                .unwrap();
        }
        system.start().await;

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(store.purge_expired(), 0);

        system.shutdown().await;
    }

    #[tokio::test]
    async fn record_mutation_invalidates_and_publishes() {
        let store = MemoryStore::new();
        let system = system_over(&store);
        let mut events = system.events().subscribe::<OrderEvent>().await.unwrap();

        system.cache().set("orders:list:abc", &vec![1, 2], None).await;
        system.cache().set("dashboard:summary", &7u32, None).await;

        let event = OrderEvent::Created {
            order_id: "o-1".into(),
            customer_id: "c-1".into(),
            total_cents: 500,
        };
        let report = system.record_mutation(&event).await;
        assert_eq!(report.tags, vec!["orders", "inventory", "dashboard", "finance"]);
        assert_eq!(report.keys_deleted, 2);
        assert_eq!(system.cache().get::<Vec<i32>>("orders:list:abc").await, None);

        assert_eq!(events.next().await.unwrap().event, event);
    }
}
