use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::cache::tags::CascadeMode;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheSettings {
    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// TTL and tiering policy
    #[serde(default)]
    pub cache: CacheConfig,
    /// Distributed lock settings for stampede protection
    #[serde(default)]
    pub stampede: StampedeConfig,
    /// Tag graph and invalidation channel
    #[serde(default)]
    pub invalidation: InvalidationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CacheSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.redis.enabled && self.redis.url.trim().is_empty() {
            return Err("redis.enabled=true requires redis.url".into());
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.cache.default_ttl_secs == 0 {
            return Err("cache.default_ttl_secs must be > 0".into());
        }
        if self.cache.null_ttl_secs == 0 {
            return Err("cache.null_ttl_secs must be > 0".into());
        }
        if self.cache.cleanup_interval_secs == 0 {
            return Err("cache.cleanup_interval_secs must be > 0".into());
        }
        if self.cache.jitter_percent > 100 {
            return Err("cache.jitter_percent must be <= 100".into());
        }
        if self.stampede.lock_ttl_secs == 0 {
            return Err("stampede.lock_ttl_secs must be > 0".into());
        }
        if self.stampede.retry_delay_ms == 0 {
            return Err("stampede.retry_delay_ms must be > 0".into());
        }
        if self.invalidation.channel.trim().is_empty() {
            return Err("invalidation.channel must not be empty".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

/// Redis configuration for the shared store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (falls back to an in-process store without it)
    /// Default: false (single-instance deployments)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Cache TTL policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a caller does not pass one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Spread applied to every TTL, in percent of the base
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: u32,

    /// TTL of the null marker written for confirmed-absent values
    #[serde(default = "default_null_ttl_secs")]
    pub null_ttl_secs: u64,

    /// Local (L1) memoization TTL in milliseconds; 0 disables the tier
    #[serde(default = "default_local_ttl_ms")]
    pub local_ttl_ms: u64,

    /// Local (L1) cache max entries
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,

    /// How often the background task sweeps expired entries
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_jitter_percent() -> u32 {
    20
}

fn default_null_ttl_secs() -> u64 {
    10
}

fn default_local_ttl_ms() -> u64 {
    5000
}

fn default_local_max_entries() -> usize {
    10000
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            jitter_percent: default_jitter_percent(),
            null_ttl_secs: default_null_ttl_secs(),
            local_ttl_ms: default_local_ttl_ms(),
            local_max_entries: default_local_max_entries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn null_ttl(&self) -> Duration {
        Duration::from_secs(self.null_ttl_secs)
    }

    pub fn local_ttl(&self) -> Duration {
        Duration::from_millis(self.local_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Stampede lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StampedeConfig {
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Delay between cache polls while another process holds the lock
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Polls before falling back to a direct fetch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_lock_ttl_secs() -> u64 {
    10
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    30
}

impl Default for StampedeConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl StampedeConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Invalidation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationConfig {
    /// Pub/sub channel carrying invalidation events
    #[serde(default = "default_channel")]
    pub channel: String,

    #[serde(default)]
    pub cascade_mode: CascadeMode,

    /// Accept cycles in the cascade table (forces closure mode)
    #[serde(default)]
    pub allow_cycles: bool,

    /// Cascade table: tag -> dependent tags.
    /// Empty uses the built-in ERP table.
    #[serde(default)]
    pub cascade: BTreeMap<String, Vec<String>>,

    /// Key namespaces owned by a tag, when they differ from the tag itself
    #[serde(default)]
    pub namespaces: BTreeMap<String, Vec<String>>,
}

fn default_channel() -> String {
    "cache:invalidate".to_string()
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            cascade_mode: CascadeMode::default(),
            allow_cycles: false,
            cascade: BTreeMap::new(),
            namespaces: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::CacheSettings;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<CacheSettings, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                } else {
                    return Err(format!("config file not found: {p}"));
                }
            }
            None => {
                let default_path = PathBuf::from("stockpile.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., STOCKPILE__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("STOCKPILE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: CacheSettings = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
