use std::{env, str::FromStr, time::Duration};

use dinecache_core::cache::AvailabilityPolicy;

/// Cache configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Redis connection URL (default: "redis://localhost:6379")
    pub redis_url: String,
    /// TTL used when callers do not pick one, in seconds (default: 300)
    pub default_ttl_seconds: u64,
    /// Upper bound on any L1 entry's TTL, in seconds (default: 60)
    pub l1_ttl_cap_seconds: u64,
    /// Maximum number of L1 entries before LRU eviction (default: 10,000)
    pub l1_max_entries: usize,
    /// Consecutive L2 failures before the tier is skipped (default: 3)
    pub l2_failure_threshold: u32,
    /// How long a degraded L2 is skipped, in seconds (default: 30)
    pub l2_cooldown_seconds: u64,
    /// Keys requested per SCAN round trip during invalidation (default: 500)
    pub l2_scan_batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `REDIS_URL` - Redis connection URL (default: "redis://localhost:6379")
    /// - `CACHE_DEFAULT_TTL_SECONDS` - Default TTL (default: 300)
    /// - `CACHE_L1_TTL_CAP_SECONDS` - L1 TTL ceiling (default: 60)
    /// - `CACHE_L1_MAX_ENTRIES` - L1 capacity (default: 10,000)
    /// - `CACHE_L2_FAILURE_THRESHOLD` - Failures before degrading (default: 3)
    /// - `CACHE_L2_COOLDOWN_SECONDS` - Degraded cooldown (default: 30)
    /// - `CACHE_L2_SCAN_BATCH_SIZE` - SCAN batch size (default: 500)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Missing or unparseable values fall back to defaults. Sizes and the
    /// failure threshold are clamped to at least 1.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            default_ttl_seconds: parse_or(
                lookup("CACHE_DEFAULT_TTL_SECONDS"),
                defaults.default_ttl_seconds,
            ),
            l1_ttl_cap_seconds: parse_or(
                lookup("CACHE_L1_TTL_CAP_SECONDS"),
                defaults.l1_ttl_cap_seconds,
            ),
            l1_max_entries: parse_or(lookup("CACHE_L1_MAX_ENTRIES"), defaults.l1_max_entries)
                .max(1),
            l2_failure_threshold: parse_or(
                lookup("CACHE_L2_FAILURE_THRESHOLD"),
                defaults.l2_failure_threshold,
            )
            .max(1),
            l2_cooldown_seconds: parse_or(
                lookup("CACHE_L2_COOLDOWN_SECONDS"),
                defaults.l2_cooldown_seconds,
            ),
            l2_scan_batch_size: parse_or(
                lookup("CACHE_L2_SCAN_BATCH_SIZE"),
                defaults.l2_scan_batch_size,
            )
            .max(1),
        }
    }

    /// Get the default TTL as a Duration.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    /// Get the L1 TTL ceiling as a Duration.
    pub fn l1_ttl_cap(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_cap_seconds)
    }

    /// Get the L2 availability policy.
    pub fn availability_policy(&self) -> AvailabilityPolicy {
        AvailabilityPolicy::new(
            self.l2_failure_threshold,
            Duration::from_secs(self.l2_cooldown_seconds),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            default_ttl_seconds: 300,
            l1_ttl_cap_seconds: 60,
            l1_max_entries: 10_000,
            l2_failure_threshold: 3,
            l2_cooldown_seconds: 30,
            l2_scan_batch_size: 500,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::from_lookup(lookup_from(&[]));

        assert_eq!(config, Config::default());
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.default_ttl_seconds, 300);
        assert_eq!(config.l1_ttl_cap_seconds, 60);
        assert_eq!(config.l1_max_entries, 10_000);
        assert_eq!(config.l2_failure_threshold, 3);
        assert_eq!(config.l2_cooldown_seconds, 30);
        assert_eq!(config.l2_scan_batch_size, 500);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("REDIS_URL", "redis://cache.internal:6380"),
            ("CACHE_DEFAULT_TTL_SECONDS", "120"),
            ("CACHE_L1_TTL_CAP_SECONDS", "15"),
            ("CACHE_L1_MAX_ENTRIES", "256"),
            ("CACHE_L2_FAILURE_THRESHOLD", "5"),
            ("CACHE_L2_COOLDOWN_SECONDS", "10"),
            ("CACHE_L2_SCAN_BATCH_SIZE", " 100 "),
        ]));

        assert_eq!(config.redis_url, "redis://cache.internal:6380");
        assert_eq!(config.default_ttl(), Duration::from_secs(120));
        assert_eq!(config.l1_ttl_cap(), Duration::from_secs(15));
        assert_eq!(config.l1_max_entries, 256);
        assert_eq!(
            config.availability_policy(),
            AvailabilityPolicy::new(5, Duration::from_secs(10))
        );
        assert_eq!(config.l2_scan_batch_size, 100);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("CACHE_L1_TTL_CAP_SECONDS", "a minute"),
            ("CACHE_L2_FAILURE_THRESHOLD", "-1"),
        ]));

        assert_eq!(config.l1_ttl_cap_seconds, 60);
        assert_eq!(config.l2_failure_threshold, 3);
    }

    #[test]
    fn test_zero_sizes_are_clamped() {
        let config = Config::from_lookup(lookup_from(&[
            ("CACHE_L1_MAX_ENTRIES", "0"),
            ("CACHE_L2_FAILURE_THRESHOLD", "0"),
            ("CACHE_L2_SCAN_BATCH_SIZE", "0"),
        ]));

        assert_eq!(config.l1_max_entries, 1);
        assert_eq!(config.l2_failure_threshold, 1);
        assert_eq!(config.l2_scan_batch_size, 1);
    }
}
