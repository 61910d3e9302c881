//! Two-tier cache-aside orchestrator.
//!
//! [`CacheOrchestrator`] is the only type consumers talk to. Reads try the
//! in-process L1 first and fall back to the durable L2, repopulating L1 on an
//! L2 hit. Writes go to both tiers. When L2 misbehaves the orchestrator keeps
//! serving from L1 alone: callers only ever see values or misses, never cache
//! errors, except for malformed invalidation patterns.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

use dinecache_core::cache::{
    deserialize, parse_pattern_expr, serialize, CacheError, InvalidPatternError, MetricsSink,
    Pattern, RemoteStore, Tier, TierStatus,
};

use super::l2::L2Store;
use super::memory::MemoryStore;
use super::metrics::{CACHE_GET, CACHE_HIT, CACHE_MISS};
use crate::config::Config;

const LAYER_L1: &[(&str, &str)] = &[("layer", "l1")];
const LAYER_L2: &[(&str, &str)] = &[("layer", "l2")];
const LAYER_L1_ONLY: &[(&str, &str)] = &[("layer", "l1_only")];

struct Inner {
    l1: MemoryStore,
    l2: L2Store,
    metrics: Arc<dyn MetricsSink>,
    default_ttl: Duration,
}

/// Resilient two-tier cache.
///
/// Cheap to clone; clones share both tiers. Construct one at startup, hand
/// clones to the services that need it, and call [`close`](Self::close) on
/// shutdown.
///
/// Concurrent misses on the same key are not coalesced: each caller of
/// [`get_or_set`](Self::get_or_set) runs its own producer.
#[derive(Clone)]
pub struct CacheOrchestrator {
    inner: Arc<Inner>,
}

impl CacheOrchestrator {
    pub fn new(
        config: &Config,
        remote: Arc<dyn RemoteStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let l1 = MemoryStore::new(config.l1_max_entries, config.l1_ttl_cap());
        let l2 = L2Store::new(
            remote,
            config.availability_policy(),
            config.l2_scan_batch_size,
            Arc::clone(&metrics),
        );
        tracing::info!(
            l1_max_entries = config.l1_max_entries,
            l1_ttl_cap_seconds = config.l1_ttl_cap_seconds,
            l2_failure_threshold = config.l2_failure_threshold,
            l2_cooldown_seconds = config.l2_cooldown_seconds,
            "Cache initialized"
        );
        Self {
            inner: Arc::new(Inner {
                l1,
                l2,
                metrics,
                default_ttl: config.default_ttl(),
            }),
        }
    }

    /// TTL to use when a caller has no better idea.
    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Returns the durable tier status.
    ///
    /// Callers that need hard guarantees (e.g. counters) can check this
    /// instead of relying on best-effort fallbacks.
    pub fn l2_status(&self) -> TierStatus {
        self.inner.l2.status()
    }

    /// Looks a key up in L1, then in L2.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let started = Instant::now();
        let value = self.lookup(key).await;
        self.inner.metrics.timing(CACHE_GET, started.elapsed(), &[]);
        value
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let inner = &self.inner;

        if let Some(bytes) = inner.l1.get(key) {
            match deserialize::<T>(&bytes) {
                Ok(value) => {
                    tracing::trace!(key = %key, "Cache hit (L1)");
                    inner.metrics.increment(CACHE_HIT, 1, LAYER_L1);
                    return Some(value);
                }
                Err(err) => {
                    tracing::warn!(
                        key = %key,
                        error = %err,
                        "L1 entry deserialization failed, evicting"
                    );
                    inner.l1.delete(key);
                }
            }
        }

        match inner.l2.get(key).await {
            Ok(Some(entry)) => match deserialize::<T>(&entry.value) {
                Ok(value) => {
                    tracing::trace!(key = %key, "Cache hit (L2)");
                    // L1 never outlives the L2 copy
                    let ttl = entry.ttl.unwrap_or(inner.l1.ttl_cap());
                    inner.l1.set(key, entry.value, ttl, Tier::L2);
                    inner.metrics.increment(CACHE_HIT, 1, LAYER_L2);
                    Some(value)
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "L2 entry deserialization failed");
                    inner.metrics.increment(CACHE_MISS, 1, LAYER_L2);
                    None
                }
            },
            Ok(None) => {
                tracing::trace!(key = %key, "Cache miss");
                inner.metrics.increment(CACHE_MISS, 1, LAYER_L2);
                None
            }
            Err(err) => {
                tracing::trace!(key = %key, error = %err, "Cache miss (L1 only)");
                inner.metrics.increment(CACHE_MISS, 1, LAYER_L1_ONLY);
                None
            }
        }
    }

    /// Stores a value in both tiers.
    ///
    /// Returns false only if the value could not be serialized or `ttl` is
    /// zero. An L2 failure still returns true since L1 holds the value.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        if ttl.is_zero() {
            tracing::debug!(key = %key, "Zero TTL, value not cached");
            return false;
        }
        let bytes = match serialize(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Failed to serialize cache value");
                return false;
            }
        };

        let inner = &self.inner;
        let l1_ttl = inner.l1.set(key, bytes.clone(), ttl, Tier::L1);
        let l2_written = inner.l2.set_with_ttl(key, &bytes, ttl).await.is_ok();
        tracing::debug!(
            key = %key,
            ttl_seconds = ttl.as_secs(),
            l1_ttl_seconds = l1_ttl.as_secs(),
            l2_written,
            "Cache set"
        );
        true
    }

    /// Returns the cached value, or runs `producer` and caches its result.
    ///
    /// The producer runs at most once per call. Its error is returned as is
    /// and nothing is cached. On success the value is written to L1 before
    /// returning, while the L2 write runs in a detached task whose failure is
    /// only logged.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let stats: OrderStats = cache
    ///     .get_or_set(&order_stats_key(restaurant_id), ttl, || {
    ///         repository.order_stats(restaurant_id)
    ///     })
    ///     .await?;
    /// ```
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key).await {
            return Ok(value);
        }

        let value = producer().await?;
        if ttl.is_zero() {
            return Ok(value);
        }

        match serialize(&value) {
            Ok(bytes) => {
                self.inner.l1.set(key, bytes.clone(), ttl, Tier::L1);
                let cache = self.clone();
                let key = key.to_string();
                tokio::spawn(async move {
                    if let Err(err) = cache.inner.l2.set_with_ttl(&key, &bytes, ttl).await {
                        tracing::debug!(key = %key, error = %err, "Background L2 write skipped");
                    }
                });
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Failed to serialize produced value");
            }
        }
        Ok(value)
    }

    /// Removes a key from both tiers. Returns true if either tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        let l1_removed = self.inner.l1.delete(key);
        let l2_removed = self.inner.l2.delete(key).await.unwrap_or(false);
        tracing::debug!(key = %key, l1_removed, l2_removed, "Cache delete");
        l1_removed || l2_removed
    }

    /// Removes every key matched by a pattern expression from both tiers.
    ///
    /// The expression is one or more patterns joined with `|`; each pattern
    /// is an exact key, a prefix ending in `*`, or a glob. The expression is
    /// validated before any tier is touched. An L2 failure on one pattern
    /// does not stop the others.
    ///
    /// Returns the number of distinct keys removed across both tiers.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPatternError`] for an empty expression, an empty
    /// segment, or a segment made only of wildcards.
    pub async fn invalidate(&self, expr: &str) -> Result<usize, InvalidPatternError> {
        let patterns = parse_pattern_expr(expr)?;
        let inner = &self.inner;

        let mut removed: HashSet<String> = HashSet::new();
        for pattern in &patterns {
            match pattern {
                Pattern::Exact(key) => {
                    if inner.l1.delete(key) {
                        removed.insert(key.clone());
                    }
                    if let Ok(true) = inner.l2.delete(key).await {
                        removed.insert(key.clone());
                    }
                }
                Pattern::Prefix(_) | Pattern::Glob(_) => {
                    removed.extend(inner.l1.remove_matching(pattern));
                    let outcome = inner.l2.scan_delete(pattern).await;
                    removed.extend(outcome.removed);
                    match outcome.error {
                        None => {}
                        Some(CacheError::Unavailable) => {
                            tracing::debug!(
                                pattern = %pattern.as_glob(),
                                "L2 skipped during invalidation"
                            );
                        }
                        Some(err) => {
                            tracing::warn!(
                                pattern = %pattern.as_glob(),
                                error = %err,
                                "L2 invalidation incomplete"
                            );
                        }
                    }
                }
            }
        }

        tracing::debug!(pattern = %expr, removed = removed.len(), "Cache invalidated");
        Ok(removed.len())
    }

    /// Returns true if either tier holds the key.
    pub async fn exists(&self, key: &str) -> bool {
        self.inner.l1.contains(key) || self.inner.l2.exists(key).await.unwrap_or(false)
    }

    /// Returns the key's remaining TTL in L2.
    ///
    /// `None` covers a missing key, a key without expiry, a key held only by
    /// L1, and an unavailable L2.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        self.inner.l2.ttl(key).await.ok().flatten()
    }

    /// Adds `amount` to an L2 counter. Returns 0 if L2 is unavailable.
    pub async fn increment(&self, key: &str, amount: i64) -> i64 {
        match self.inner.l2.increment(key, amount).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    key = %key,
                    amount,
                    error = %err,
                    "Counter increment failed, returning 0"
                );
                0
            }
        }
    }

    /// Subtracts `amount` from an L2 counter. Returns 0 if L2 is unavailable.
    pub async fn decrement(&self, key: &str, amount: i64) -> i64 {
        match self.inner.l2.decrement(key, amount).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    key = %key,
                    amount,
                    error = %err,
                    "Counter decrement failed, returning 0"
                );
                0
            }
        }
    }

    /// Fetches several keys, going to L2 once for every L1 miss.
    ///
    /// Keys found in neither tier are absent from the result.
    pub async fn get_many<T, K>(&self, keys: &[K]) -> HashMap<String, T>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        let inner = &self.inner;
        let mut found = HashMap::with_capacity(keys.len());
        let mut misses: Vec<String> = Vec::new();

        for key in keys {
            let key = key.as_ref();
            if found.contains_key(key) || misses.iter().any(|miss| miss == key) {
                continue;
            }
            let decoded = inner.l1.get(key).and_then(|bytes| match deserialize::<T>(&bytes) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(
                        key = %key,
                        error = %err,
                        "L1 entry deserialization failed, evicting"
                    );
                    inner.l1.delete(key);
                    None
                }
            });
            match decoded {
                Some(value) => {
                    inner.metrics.increment(CACHE_HIT, 1, LAYER_L1);
                    found.insert(key.to_string(), value);
                }
                None => misses.push(key.to_string()),
            }
        }

        if misses.is_empty() {
            return found;
        }

        let values = match inner.l2.get_many(&misses).await {
            Ok(values) => values,
            Err(err) => {
                tracing::trace!(misses = misses.len(), error = %err, "Batch miss (L1 only)");
                inner
                    .metrics
                    .increment(CACHE_MISS, misses.len() as u64, LAYER_L1_ONLY);
                return found;
            }
        };

        let ttl_cap = inner.l1.ttl_cap();
        for (key, entry) in misses.into_iter().zip(values) {
            let Some(entry) = entry else {
                inner.metrics.increment(CACHE_MISS, 1, LAYER_L2);
                continue;
            };
            match deserialize::<T>(&entry.value) {
                Ok(value) => {
                    let ttl = entry.ttl.unwrap_or(ttl_cap);
                    inner.l1.set(&key, entry.value, ttl, Tier::L2);
                    inner.metrics.increment(CACHE_HIT, 1, LAYER_L2);
                    found.insert(key, value);
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "L2 entry deserialization failed");
                    inner.metrics.increment(CACHE_MISS, 1, LAYER_L2);
                }
            }
        }
        found
    }

    /// Stores several values with one L1 write each and one pipelined L2 write.
    ///
    /// Returns how many entries were written to L1. Values that fail to
    /// serialize are skipped. L2 failures do not affect the result.
    pub async fn set_many<T, K>(&self, entries: &[(K, T)], ttl: Duration) -> usize
    where
        T: Serialize,
        K: AsRef<str>,
    {
        if ttl.is_zero() {
            tracing::debug!(entries = entries.len(), "Zero TTL, batch not cached");
            return 0;
        }

        let inner = &self.inner;
        let mut serialized: Vec<(String, Vec<u8>)> = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let key = key.as_ref();
            match serialize(value) {
                Ok(bytes) => {
                    inner.l1.set(key, bytes.clone(), ttl, Tier::L1);
                    serialized.push((key.to_string(), bytes));
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "Failed to serialize cache value");
                }
            }
        }

        let l2_written = inner.l2.set_many(&serialized, ttl).await.is_ok();
        tracing::debug!(entries = serialized.len(), l2_written, "Cache batch set");
        serialized.len()
    }

    /// Checks L2 connectivity. A successful ping ends a degraded period once
    /// the cooldown has elapsed.
    pub async fn ping(&self) -> bool {
        self.inner.l2.ping().await.is_ok()
    }

    /// Flushes L1 and releases the L2 connection.
    pub async fn close(&self) {
        self.inner.l1.flush();
        if let Err(err) = self.inner.l2.close().await {
            tracing::warn!(error = %err, "Failed to close L2 connection");
        }
        tracing::info!("Cache closed");
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;
    use serde_json::json;

    use dinecache_core::cache::{build_key, order_stats_key};

    use super::*;
    use crate::cache::inmemory::InMemoryRemoteStore;
    use crate::cache::metrics::{CountingMetrics, NoopMetrics, L2_DEGRADED};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OrderStats {
        total: u32,
    }

    struct Fixture {
        cache: CacheOrchestrator,
        remote: Arc<InMemoryRemoteStore>,
        metrics: Arc<CountingMetrics>,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let metrics = Arc::new(CountingMetrics::new());
        let cache = CacheOrchestrator::new(&Config::default(), remote.clone(), metrics.clone());
        Fixture {
            cache,
            remote,
            metrics,
        }
    }

    fn secs(seconds: u64) -> Duration {
        Duration::from_secs(seconds)
    }

    /// Forces the durable tier into the degraded state.
    async fn degrade(fx: &Fixture) {
        fx.remote.set_failing(true);
        for i in 0..3 {
            let _: Option<u32> = fx.cache.get(&format!("unreachable:{i}")).await;
        }
        assert_eq!(fx.cache.l2_status(), TierStatus::Degraded);
    }

    /// Lets detached tasks run until `done` holds.
    async fn settle(done: impl Fn() -> bool) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("background work did not complete");
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let fx = fixture();

        assert!(fx.cache.set("greeting", "hello", secs(60)).await);

        assert_eq!(fx.cache.get::<String>("greeting").await, Some("hello".to_string()));
        assert_eq!(fx.metrics.count(CACHE_HIT, LAYER_L1), 1);
        assert_eq!(fx.metrics.timing_samples(CACHE_GET), 1);
        assert!(fx.remote.peek("greeting").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get_while_degraded() {
        let fx = fixture();
        degrade(&fx).await;

        assert!(fx.cache.set("k", &42_u32, secs(60)).await);

        assert_eq!(fx.cache.get::<u32>("k").await, Some(42));
        assert!(fx.remote.peek("k").is_none());
    }

    #[tokio::test]
    async fn test_get_miss() {
        let fx = fixture();

        assert_eq!(fx.cache.get::<u32>("missing").await, None);
        assert_eq!(fx.metrics.count(CACHE_MISS, LAYER_L2), 1);
    }

    #[tokio::test]
    async fn test_get_with_wrong_type_is_a_miss() {
        let fx = fixture();
        fx.cache.set("k", "not a number", secs(60)).await;

        assert_eq!(fx.cache.get::<u32>("k").await, None);
        // L1 copy was evicted
        assert!(!fx.cache.inner.l1.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_cap_with_l2_degraded() {
        let fx = fixture();
        degrade(&fx).await;

        fx.cache.set("k", &1_u32, secs(600)).await;
        tokio::time::advance(secs(61)).await;

        assert_eq!(fx.cache.get::<u32>("k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_cap_with_l2_available_repopulates_l1() {
        let fx = fixture();

        fx.cache.set("k", &1_u32, secs(600)).await;
        tokio::time::advance(secs(61)).await;
        assert!(!fx.cache.inner.l1.contains("k"));

        assert_eq!(fx.cache.get::<u32>("k").await, Some(1));
        assert_eq!(fx.metrics.count(CACHE_HIT, LAYER_L2), 1);
        assert_eq!(fx.cache.inner.l1.origin("k"), Some(Tier::L2));

        assert_eq!(fx.cache.get::<u32>("k").await, Some(1));
        assert_eq!(fx.metrics.count(CACHE_HIT, LAYER_L1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_l1_copy_expires_with_l2_entry() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let config = Config::default();
        let writer = CacheOrchestrator::new(&config, remote.clone(), Arc::new(NoopMetrics));
        let reader = CacheOrchestrator::new(&config, remote.clone(), Arc::new(NoopMetrics));

        writer.set("k", &1_u32, secs(30)).await;
        tokio::time::advance(secs(29)).await;
        assert_eq!(reader.get::<u32>("k").await, Some(1));
        assert_eq!(reader.inner.l1.origin("k"), Some(Tier::L2));

        tokio::time::advance(secs(40)).await;
        assert_eq!(reader.get::<u32>("k").await, None);
        assert!(!reader.inner.l1.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_many_l1_copies_expire_with_l2_entries() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let config = Config::default();
        let writer = CacheOrchestrator::new(&config, remote.clone(), Arc::new(NoopMetrics));
        let reader = CacheOrchestrator::new(&config, remote.clone(), Arc::new(NoopMetrics));

        writer.set("short", &1_u32, secs(10)).await;
        writer.set("long", &2_u32, secs(600)).await;
        let found: HashMap<String, u32> = reader.get_many(&["short", "long"]).await;
        assert_eq!(found.len(), 2);

        tokio::time::advance(secs(11)).await;
        assert!(!reader.inner.l1.contains("short"));
        assert!(reader.inner.l1.contains("long"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_is_clamped() {
        let fx = fixture();

        assert!(fx.cache.set("k", &1_u32, Duration::MAX).await);
        tokio::time::advance(secs(61)).await;

        assert_eq!(fx.cache.get::<u32>("k").await, Some(1));
        assert!(fx.cache.ttl("k").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_degrade_and_recover() {
        let fx = fixture();
        degrade(&fx).await;
        assert_eq!(fx.metrics.total(L2_DEGRADED), 1);

        let calls = fx.remote.call_count();
        fx.cache.set("k", &1_u32, secs(60)).await;
        let _: Option<u32> = fx.cache.get("other").await;
        fx.cache.delete("k").await;
        fx.cache.invalidate("orders:restaurant:A:*").await.unwrap();
        assert_eq!(fx.cache.increment("counter:c", 1).await, 0);
        assert!(!fx.cache.ping().await);
        assert_eq!(fx.remote.call_count(), calls);
        assert_eq!(fx.metrics.count(CACHE_MISS, LAYER_L1_ONLY), 4);

        fx.remote.set_failing(false);
        tokio::time::advance(secs(31)).await;

        assert!(fx.cache.ping().await);
        assert_eq!(fx.cache.l2_status(), TierStatus::Available);
        assert_eq!(fx.remote.call_count(), calls + 1);
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let fx = fixture();
        for key in ["orders:restaurant:A:1", "orders:restaurant:A:2", "orders:restaurant:B:1"] {
            fx.cache.set(key, &1_u32, secs(60)).await;
        }

        let removed = fx.cache.invalidate("orders:restaurant:A:*").await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(fx.cache.get::<u32>("orders:restaurant:A:1").await, None);
        assert_eq!(fx.cache.get::<u32>("orders:restaurant:A:2").await, None);
        assert_eq!(fx.cache.get::<u32>("orders:restaurant:B:1").await, Some(1));
        assert_eq!(fx.remote.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_counts_l2_only_keys() {
        let fx = fixture();
        fx.cache.set("menu:restaurant:A:full", &1_u32, secs(60)).await;
        fx.cache.inner.l1.flush();

        let removed = fx
            .cache
            .invalidate("menu:restaurant:A:*|menu:restaurant:A:full")
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(fx.remote.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_with_l2_down_clears_l1() {
        let fx = fixture();
        fx.cache.set("orders:restaurant:A:1", &1_u32, secs(60)).await;
        degrade(&fx).await;

        let removed = fx.cache.invalidate("orders:*:1|order:9").await.unwrap();

        assert_eq!(removed, 1);
        assert!(!fx.cache.inner.l1.contains("orders:restaurant:A:1"));
    }

    #[tokio::test]
    async fn test_invalidate_counts_batches_removed_before_scan_failure() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let config = Config {
            l2_scan_batch_size: 2,
            ..Config::default()
        };
        let cache = CacheOrchestrator::new(&config, remote.clone(), Arc::new(NoopMetrics));
        for i in 0..5 {
            cache
                .set(&format!("orders:restaurant:A:{i}"), &1_u32, secs(60))
                .await;
        }
        cache.inner.l1.flush();
        remote.fail_after("scan", 1);

        let removed = cache.invalidate("orders:restaurant:A:*").await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(remote.len(), 3);
    }

    #[tokio::test]
    async fn test_invalidate_continues_after_scan_failure() {
        let fx = fixture();
        fx.cache.set("orders:restaurant:A:1", &1_u32, secs(60)).await;
        fx.cache.set("menu:restaurant:A:full", &1_u32, secs(60)).await;
        fx.cache.inner.l1.flush();
        fx.remote.fail_after("scan", 0);

        let removed = fx
            .cache
            .invalidate("orders:restaurant:A:*|menu:restaurant:A:full")
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(fx.remote.peek("menu:restaurant:A:full").is_none());
        assert!(fx.remote.peek("orders:restaurant:A:1").is_some());
        assert_eq!(fx.cache.l2_status(), TierStatus::Available);
    }

    #[tokio::test]
    async fn test_invalid_patterns_are_rejected_before_io() {
        let fx = fixture();

        for expr in ["", "*", "orders:*||menu:*", "orders:* "] {
            assert!(fx.cache.invalidate(expr).await.is_err(), "{expr:?}");
        }
        assert_eq!(fx.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_get_or_set_runs_producer_once_and_caches() {
        let fx = fixture();
        let runs = AtomicUsize::new(0);
        let key = order_stats_key("R1");

        for _ in 0..2 {
            let stats = fx
                .cache
                .get_or_set(&key, secs(30), || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(OrderStats { total: 5 })
                })
                .await
                .unwrap();
            assert_eq!(stats, OrderStats { total: 5 });
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        settle(|| fx.remote.peek(&key).is_some()).await;
    }

    #[tokio::test]
    async fn test_get_or_set_with_failing_writes() {
        let fx = fixture();
        fx.remote.set_failing(true);

        let value = fx
            .cache
            .get_or_set("k", secs(30), || async { Ok::<_, std::io::Error>(7_u32) })
            .await
            .unwrap();

        assert_eq!(value, 7);
        settle(|| fx.remote.calls_of("set_with_ttl") == 1).await;
        assert_eq!(fx.cache.get::<u32>("k").await, Some(7));
    }

    #[tokio::test]
    async fn test_get_or_set_propagates_producer_error() {
        let fx = fixture();

        let result: Result<u32, String> = fx
            .cache
            .get_or_set("k", secs(30), || async { Err("database down".to_string()) })
            .await;

        assert_eq!(result, Err("database down".to_string()));
        assert!(!fx.cache.inner.l1.contains("k"));
        tokio::task::yield_now().await;
        assert_eq!(fx.remote.calls_of("set_with_ttl"), 0);
    }

    #[tokio::test]
    async fn test_delete_from_both_tiers() {
        let fx = fixture();
        fx.cache.set("k", &1_u32, secs(60)).await;

        assert!(fx.cache.exists("k").await);
        assert!(fx.cache.delete("k").await);
        assert!(!fx.cache.exists("k").await);
        assert!(!fx.cache.delete("k").await);
    }

    #[tokio::test]
    async fn test_exists_falls_back_to_l2() {
        let fx = fixture();
        fx.cache.set("k", &1_u32, secs(60)).await;
        fx.cache.inner.l1.flush();

        assert!(fx.cache.exists("k").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_reports_l2_remaining() {
        let fx = fixture();
        fx.cache.set("k", &1_u32, secs(300)).await;
        tokio::time::advance(secs(100)).await;

        assert_eq!(fx.cache.ttl("k").await, Some(secs(200)));
        assert_eq!(fx.cache.ttl("missing").await, None);

        degrade(&fx).await;
        assert_eq!(fx.cache.ttl("k").await, None);
    }

    #[tokio::test]
    async fn test_counters() {
        let fx = fixture();

        assert_eq!(fx.cache.increment("counter:orders", 3).await, 3);
        assert_eq!(fx.cache.decrement("counter:orders", 1).await, 2);
        assert!(!fx.cache.inner.l1.contains("counter:orders"));

        fx.remote.set_failing(true);
        assert_eq!(fx.cache.increment("counter:orders", 1).await, 0);
    }

    #[tokio::test]
    async fn test_batch_correctness() {
        let fx = fixture();

        let written = fx
            .cache
            .set_many(&[("k1", 1_u32), ("k2", 2_u32)], secs(60))
            .await;
        assert_eq!(written, 2);

        let found: HashMap<String, u32> = fx.cache.get_many(&["k1", "k2", "k3"]).await;

        assert_eq!(found.len(), 2);
        assert_eq!(found.get("k1"), Some(&1));
        assert_eq!(found.get("k2"), Some(&2));
        assert!(!found.contains_key("k3"));
    }

    #[tokio::test]
    async fn test_get_many_uses_one_l2_round_trip() {
        let fx = fixture();
        fx.cache
            .set_many(&[("k1", 1_u32), ("k2", 2_u32), ("k3", 3_u32)], secs(60))
            .await;
        fx.cache.inner.l1.delete("k2");
        fx.cache.inner.l1.delete("k3");

        let found: HashMap<String, u32> = fx.cache.get_many(&["k1", "k2", "k3", "k4"]).await;

        assert_eq!(found.len(), 3);
        assert_eq!(fx.remote.calls_of("get_many"), 1);
        assert_eq!(fx.remote.calls_of("get"), 0);
        assert_eq!(fx.cache.inner.l1.origin("k2"), Some(Tier::L2));
    }

    #[tokio::test]
    async fn test_set_many_with_failing_l2() {
        let fx = fixture();
        fx.remote.set_failing(true);

        let written = fx
            .cache
            .set_many(&[("k1".to_string(), 1_u32), ("k2".to_string(), 2_u32)], secs(60))
            .await;

        assert_eq!(written, 2);
        let found: HashMap<String, u32> = fx.cache.get_many(&["k1", "k2"]).await;
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_not_cached() {
        let fx = fixture();

        assert!(!fx.cache.set("k", &1_u32, Duration::ZERO).await);
        assert_eq!(fx.cache.set_many(&[("k", 1_u32)], Duration::ZERO).await, 0);
        assert_eq!(fx.remote.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_stats_scenario() {
        let fx = fixture();
        let key = order_stats_key("R1");
        assert_eq!(key, "orders:restaurant:R1:stats");

        fx.cache.set(&key, &OrderStats { total: 5 }, secs(30)).await;
        tokio::time::advance(secs(10)).await;
        assert_eq!(
            fx.cache.get::<OrderStats>(&key).await,
            Some(OrderStats { total: 5 })
        );

        fx.remote.set_failing(true);
        tokio::time::advance(secs(61)).await;

        assert_eq!(fx.cache.get::<OrderStats>(&key).await, None);
    }

    #[tokio::test]
    async fn test_filtered_keys_share_cache_entries() {
        let fx = fixture();
        let a = build_key("orders", &json!({"status": "open", "channel": "web"})).unwrap();
        let b = build_key("orders", &json!({"channel": "web", "status": "open"})).unwrap();

        fx.cache.set(&a, &3_u32, secs(60)).await;

        assert_eq!(fx.cache.get::<u32>(&b).await, Some(3));
    }

    #[tokio::test]
    async fn test_close_flushes_and_releases() {
        let fx = fixture();
        fx.cache.set("k", &1_u32, secs(60)).await;

        fx.cache.close().await;

        assert!(fx.cache.inner.l1.is_empty());
        assert!(fx.remote.is_closed());
        assert!(!fx.cache.ping().await);
    }
}
