pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod observability;
pub mod system;

pub use cache::{
    CascadeMode, ComputeOptions, InvalidateOptions, InvalidationBus, InvalidationEvent,
    InvalidationReport, MemoryStore, RedisStore, Store, TagGraph, TieredCache, build_key,
    entity_key, jitter,
};
pub use config::{
    CacheConfig, CacheSettings, InvalidationConfig, LoggingConfig, RedisConfig, StampedeConfig,
};
pub use error::{CacheSystemError, StoreError, StoreResult};
pub use events::{DomainEvent, EventEnvelope, EventPublisher, FinanceEvent, InventoryEvent, OrderEvent};
pub use observability::{init_tracing, init_tracing_from};
pub use system::{CacheSystem, build_graph, create_store};
