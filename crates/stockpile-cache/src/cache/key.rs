//! Deterministic cache key construction.
//!
//! ## Key Formats
//!
//! - `{namespace}:{hash}` for parametrized lookups, e.g. `products:list:9f86d081884c7d65`
//! - `{namespace}:{id}` for direct entity keys, e.g. `orders:42`
//! - `lock:{cache_key}` for stampede locks

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

/// Prefix of stampede lock keys.
pub const LOCK_PREFIX: &str = "lock:";

/// Hex characters kept from the parameter digest.
const HASH_LEN: usize = 16;

/// Build a cache key from a namespace and a parameter object.
///
/// Top-level `null` and empty-string fields are dropped and object keys are
/// sorted at every depth, so the same logical query always maps to the same
/// key regardless of field order.
///
/// Parameters that cannot be represented as JSON get a unique throwaway key,
/// so they always miss instead of sharing an entry with other failures.
pub fn build_key<P: Serialize + ?Sized>(namespace: &str, params: &P) -> String {
    match try_build_key(namespace, params) {
        Ok(key) => key,
        Err(e) => {
            warn!(namespace, error = %e, "cache key parameters are not serializable");
            format!("{namespace}:unkeyed:{}", Uuid::new_v4().simple())
        }
    }
}

/// Like [`build_key`], but reports parameters that fail to serialize.
pub fn try_build_key<P: Serialize + ?Sized>(
    namespace: &str,
    params: &P,
) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(params)?;
    let canonical = canonical_json(&normalize(value));
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_LEN);
    Ok(format!("{namespace}:{hash}"))
}

/// Key for a single entity addressed by identifier.
#[inline]
pub fn entity_key(namespace: &str, id: impl std::fmt::Display) -> String {
    format!("{namespace}:{id}")
}

/// Lock key guarding recomputation of `cache_key`.
#[inline]
pub fn lock_key(cache_key: &str) -> String {
    format!("{LOCK_PREFIX}{cache_key}")
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !is_blank(v))
                .collect(),
        ),
        other => other,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Serialize with object keys in lexicographic order, independent of whether
/// `serde_json` was built with `preserve_order`.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> =
                map.iter().map(|(k, v)| (k, canonical_json(v))).collect();
            let body = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        scalar => scalar.to_string(),
    }
}
