//! Two-tier caching with tag invalidation.
//!
//! ## Architecture
//!
//! - **L1 Cache (DashMap)**: In-memory, per-instance, short-lived
//! - **L2 Cache (Store)**: Redis when reachable, shared across instances
//! - **Stampede guard**: `SET NX EX` lock so one process recomputes a hot key
//! - **Tag graph**: invalidating a tag clears the tags that depend on it
//! - **Pub/Sub**: Cross-instance L1 invalidation
//!
//! ## Cache Hierarchy
//!
//! ```text
//! get_or_compute → L1 (DashMap) → L2 (Redis) → Source (DB/API)
//!                      ↓               ↓             ↓
//!                 <1µs latency    ~1ms latency   jittered write-back
//! ```
//!
//! ## Graceful Degradation
//!
//! If Redis is unavailable or disabled, the engine runs over [`MemoryStore`]
//! and every store error becomes a cache miss.

pub mod bus;
pub mod client;
pub mod jitter;
pub mod key;
pub mod local;
pub mod lock;
pub mod memory_store;
pub mod redis_store;
pub mod store;
pub mod tags;
pub mod tiered;

pub use bus::{
    InvalidateOptions, InvalidationBus, InvalidationEvent, InvalidationListener,
    InvalidationReport,
};
pub use client::{CacheSlot, LockAttempt, NULL_MARKER, StoreClient};
pub use jitter::{jitter, jitter_secs};
pub use key::{build_key, entity_key, lock_key, try_build_key};
pub use local::{CachedEntry, LocalCache};
pub use lock::{Acquire, LockGuard, StampedeGuard};
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{Store, Subscription};
pub use tags::{CascadeMode, KeyScope, TagGraph, TagGraphBuilder, TagGraphError};
pub use tiered::{CacheStats, ComputeOptions, TieredCache};
