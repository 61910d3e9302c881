mod availability;
mod deadline;
mod error;
mod keys;
mod patterns;
mod serialization;
mod traits;

pub use availability::{
    Availability, AvailabilityPolicy, TierStatus, Transition, DEFAULT_COOLDOWN,
    DEFAULT_FAILURE_THRESHOLD,
};
pub use deadline::{deadline_after, MAX_DEADLINE_OFFSET};
pub use error::{CacheError, Result};
pub use keys::{
    build_key, counter_key, inventory_key, inventory_pattern, join_patterns, menu_key,
    menu_pattern, order_key, order_stats_key, restaurant_orders_key, restaurant_orders_pattern,
    restaurant_orders_prefix, HASH_LEN,
};
pub use patterns::{
    parse_pattern_expr, pattern_matches, InvalidPatternError, Pattern, PATTERN_DELIMITER,
};
pub use serialization::{deserialize, serialize, SerializationError};
pub use traits::{MetricsSink, RemoteEntry, RemoteStore};

use std::fmt;

/// The tier a cache entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// The in-process tier.
    L1,
    /// The durable networked tier.
    L2,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
