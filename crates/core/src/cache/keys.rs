//! Cache key and pattern builders.
//!
//! Parameterized queries (order lists filtered by status, channel, date...)
//! are keyed by a short digest of their canonicalized filter set, so the
//! same filters always land on the same key regardless of field order.
//! Each aggregate also publishes a pattern that covers every cached view of
//! it, so write paths can invalidate without enumerating keys.
//!
//! Digests are truncated to [`HASH_LEN`] hex characters. Two different filter
//! sets colliding is unlikely but possible; that risk is accepted.

use std::fmt::Display;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::patterns::PATTERN_DELIMITER;
use super::serialization::{Result, SerializationError};

/// Number of hex characters of the SHA-256 digest appended to hashed keys.
pub const HASH_LEN: usize = 8;

/// Builds a deterministic key from a semantic prefix and a filter set.
///
/// Object keys are sorted recursively before hashing. An empty filter set
/// (`{}` or `null`) yields the prefix unchanged.
///
/// # Errors
///
/// Returns [`SerializationError::SerializeFailed`] if the filters cannot be
/// represented as JSON (e.g. maps with non-string keys).
///
/// # Examples
///
/// ```
/// use dinecache_core::cache::build_key;
/// use serde_json::json;
///
/// let a = build_key("orders", &json!({"status": "open", "channel": "web"})).unwrap();
/// let b = build_key("orders", &json!({"channel": "web", "status": "open"})).unwrap();
/// assert_eq!(a, b);
/// assert!(a.starts_with("orders:"));
/// ```
pub fn build_key<F: Serialize + ?Sized>(prefix: &str, filters: &F) -> Result<String> {
    let value = serde_json::to_value(filters)
        .map_err(|e| SerializationError::SerializeFailed(e.to_string()))?;

    let is_empty = match &value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if is_empty {
        return Ok(prefix.to_string());
    }

    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_LEN);

    Ok(format!("{prefix}:{hash}"))
}

/// Writes `value` as compact JSON with object keys in lexicographic order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // String serialization cannot fail
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Returns the key prefix shared by every cached order view of a restaurant.
pub fn restaurant_orders_prefix(restaurant_id: impl Display) -> String {
    format!("orders:restaurant:{}", restaurant_id)
}

/// Returns the cache key for a filtered order list of a restaurant.
pub fn restaurant_orders_key<F: Serialize + ?Sized>(
    restaurant_id: impl Display,
    filters: &F,
) -> Result<String> {
    build_key(
        &format!("{}:list", restaurant_orders_prefix(restaurant_id)),
        filters,
    )
}

/// Returns the cache key for the order stats summary of a restaurant.
pub fn order_stats_key(restaurant_id: impl Display) -> String {
    format!("{}:stats", restaurant_orders_prefix(restaurant_id))
}

/// Returns the pattern matching every cached order view of a restaurant.
pub fn restaurant_orders_pattern(restaurant_id: impl Display) -> String {
    format!("{}:*", restaurant_orders_prefix(restaurant_id))
}

/// Returns the cache key for a single order.
pub fn order_key(order_id: impl Display) -> String {
    format!("order:{}", order_id)
}

/// Returns the cache key for a filtered inventory view of a restaurant.
pub fn inventory_key<F: Serialize + ?Sized>(
    restaurant_id: impl Display,
    filters: &F,
) -> Result<String> {
    build_key(&format!("inventory:restaurant:{}:view", restaurant_id), filters)
}

/// Returns the pattern matching every cached inventory view of a restaurant.
pub fn inventory_pattern(restaurant_id: impl Display) -> String {
    format!("inventory:restaurant:{}:*", restaurant_id)
}

/// Returns the cache key for the full menu of a restaurant.
pub fn menu_key(restaurant_id: impl Display) -> String {
    format!("menu:restaurant:{}:full", restaurant_id)
}

/// Returns the pattern matching every cached menu view of a restaurant.
pub fn menu_pattern(restaurant_id: impl Display) -> String {
    format!("menu:restaurant:{}:*", restaurant_id)
}

/// Returns the key of a durable counter.
pub fn counter_key(name: impl Display) -> String {
    format!("counter:{}", name)
}

/// Joins patterns into a single invalidation expression.
///
/// # Examples
///
/// ```
/// use dinecache_core::cache::{join_patterns, menu_pattern, restaurant_orders_pattern};
///
/// let expr = join_patterns(&[restaurant_orders_pattern("R1"), menu_pattern("R1")]);
/// assert_eq!(expr, "orders:restaurant:R1:*|menu:restaurant:R1:*");
/// ```
pub fn join_patterns<S: AsRef<str>>(patterns: &[S]) -> String {
    let mut expr = String::new();
    for (i, pattern) in patterns.iter().enumerate() {
        if i > 0 {
            expr.push(PATTERN_DELIMITER);
        }
        expr.push_str(pattern.as_ref());
    }
    expr
}
