//! Randomized TTLs to keep entries written together from expiring together.

use rand::Rng;
use std::time::Duration;

/// Default spread, in percent of the base TTL.
pub const DEFAULT_JITTER_PERCENT: u32 = 20;

/// Return `base_secs ± percent%`, rounded to whole seconds and floored at 1.
pub fn jitter_secs(base_secs: u64, percent: u32) -> u64 {
    let spread = base_secs as f64 * f64::from(percent.min(100)) / 100.0;
    let offset = if spread > 0.0 {
        rand::thread_rng().gen_range(-spread..=spread)
    } else {
        0.0
    };
    ((base_secs as f64 + offset).round() as u64).max(1)
}

/// [`jitter_secs`] over a `Duration`; sub-second precision is dropped.
pub fn jitter(base: Duration, percent: u32) -> Duration {
    Duration::from_secs(jitter_secs(base.as_secs(), percent))
}
