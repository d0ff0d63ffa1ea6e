//! Error types for the cache engine.
//!
//! Store failures are recovered inside [`crate::cache::StoreClient`] and never
//! reach callers of the tiered accessor; these types surface only from the raw
//! [`crate::cache::Store`] capability and from startup.

use crate::cache::tags::TagGraphError;

/// Errors raised by a [`crate::cache::Store`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Redis subscribe error: {0}")]
    Subscribe(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        StoreError::Pool(e.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while building a [`crate::CacheSystem`].
#[derive(Debug, thiserror::Error)]
pub enum CacheSystemError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    TagGraph(#[from] TagGraphError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
