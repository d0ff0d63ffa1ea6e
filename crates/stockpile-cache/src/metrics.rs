//! Cache engine metrics.
//!
//! Recorded through the `metrics` facade; the host process installs the
//! recorder (Prometheus or otherwise). Without one, every call is a no-op.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_NULL_HITS_TOTAL: &str = "cache_null_hits_total";
    pub const CACHE_FETCHES_TOTAL: &str = "cache_fetches_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";
    pub const CACHE_STORE_ERRORS_TOTAL: &str = "cache_store_errors_total";

    pub const CACHE_LOCK_ACQUIRED_TOTAL: &str = "cache_lock_acquired_total";
    pub const CACHE_LOCK_CONTENDED_TOTAL: &str = "cache_lock_contended_total";
    pub const CACHE_LOCK_FALLBACK_TOTAL: &str = "cache_lock_fallback_total";

    pub const CACHE_INVALIDATIONS_TOTAL: &str = "cache_invalidations_total";
}

/// Record a cache hit.
pub fn record_cache_hit(tier: &str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier.to_string()).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a lookup answered by a null marker.
pub fn record_null_hit() {
    counter!(names::CACHE_NULL_HITS_TOTAL).increment(1);
}

/// Record a call into the system of record.
pub fn record_fetch() {
    counter!(names::CACHE_FETCHES_TOTAL).increment(1);
}

/// Set the number of cache entries.
pub fn set_cache_entries(tier: &str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "tier" => tier.to_string()).set(count as f64);
}

/// Record a swallowed store failure.
pub fn record_store_error(op: &'static str) {
    counter!(names::CACHE_STORE_ERRORS_TOTAL, "op" => op).increment(1);
}

pub fn record_lock_acquired() {
    counter!(names::CACHE_LOCK_ACQUIRED_TOTAL).increment(1);
}

pub fn record_lock_contended() {
    counter!(names::CACHE_LOCK_CONTENDED_TOTAL).increment(1);
}

/// Record a stampede wait that gave up and fetched directly.
pub fn record_lock_fallback() {
    counter!(names::CACHE_LOCK_FALLBACK_TOTAL).increment(1);
}

/// Record an invalidated tag, labelled by its first segment to bound cardinality.
pub fn record_invalidation(tag: &str) {
    let root = tag.split(':').next().unwrap_or(tag).to_string();
    counter!(names::CACHE_INVALIDATIONS_TOTAL, "root" => root).increment(1);
}
