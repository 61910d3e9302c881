//! Durable tier adapter.
//!
//! [`L2Store`] wraps a [`RemoteStore`] and owns the tier's [`Availability`].
//! Every call goes through `admit` (no I/O while degraded inside the
//! cooldown) and `observe` (failures are logged, counted, and fed to the
//! state machine).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use dinecache_core::cache::{
    Availability, AvailabilityPolicy, CacheError, MetricsSink, Pattern, RemoteEntry, RemoteStore,
    Result, TierStatus, Transition,
};

use super::metrics::{L2_DEGRADED, L2_ERROR, L2_RECOVERED};

/// Default number of keys requested per `SCAN` step.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 500;

/// Outcome of [`L2Store::scan_delete`].
///
/// `removed` holds the keys deleted by every batch that completed, even when
/// a later step failed with `error`.
#[derive(Debug, Default)]
pub struct ScanDelete {
    pub removed: Vec<String>,
    pub error: Option<CacheError>,
}

/// Availability-aware access to the durable tier.
pub struct L2Store {
    remote: Arc<dyn RemoteStore>,
    availability: Mutex<Availability>,
    scan_batch_size: usize,
    metrics: Arc<dyn MetricsSink>,
    closed: AtomicBool,
}

impl L2Store {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        policy: AvailabilityPolicy,
        scan_batch_size: usize,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            remote,
            availability: Mutex::new(Availability::new(policy)),
            scan_batch_size: scan_batch_size.max(1),
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the current tier status.
    pub fn status(&self) -> TierStatus {
        self.availability().status()
    }

    /// Returns true if a call issued now would reach the remote store.
    pub fn is_admitting(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && self.availability().permits_attempt(Instant::now())
    }

    fn availability(&self) -> MutexGuard<'_, Availability> {
        // The state machine holds plain values; a panic elsewhere cannot leave it torn.
        self.availability
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Result<()> {
        if self.is_admitting() {
            Ok(())
        } else {
            Err(CacheError::Unavailable)
        }
    }

    fn observe<T>(&self, op: &'static str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                let transition = self.availability().record_success();
                if transition == Some(Transition::Recovered) {
                    tracing::info!(op, "L2 cache recovered");
                    self.metrics.increment(L2_RECOVERED, 1, &[]);
                }
            }
            Err(err) => {
                tracing::warn!(op, error = %err, "L2 cache operation failed");
                self.metrics.increment(L2_ERROR, 1, &[("op", op)]);

                let (transition, failures) = {
                    let mut availability = self.availability();
                    let transition = availability.record_failure(Instant::now());
                    (transition, availability.consecutive_failures())
                };
                if transition == Some(Transition::Degraded) {
                    tracing::warn!(
                        op,
                        consecutive_failures = failures,
                        "L2 cache degraded, serving from L1 only"
                    );
                    self.metrics.increment(L2_DEGRADED, 1, &[]);
                }
            }
        }
        result
    }

    /// Returns the stored bytes and their remaining time to live.
    pub async fn get(&self, key: &str) -> Result<Option<RemoteEntry>> {
        self.admit()?;
        let result = self.remote.get(key).await;
        self.observe("get", result)
    }

    /// Fetches several keys in one round trip.
    pub async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<RemoteEntry>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.admit()?;
        let result = self.remote.get_many(keys).await;
        let values = self.observe("get_many", result)?;
        if values.len() != keys.len() {
            return Err(CacheError::OperationFailed(format!(
                "expected {} values, got {}",
                keys.len(),
                values.len()
            )));
        }
        Ok(values)
    }

    pub async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.admit()?;
        let result = self.remote.set_with_ttl(key, value, ttl).await;
        self.observe("set", result)
    }

    /// Writes several entries in one pipelined round trip.
    pub async fn set_many(&self, entries: &[(String, Vec<u8>)], ttl: Duration) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.admit()?;
        let result = self.remote.set_many_with_ttl(entries, ttl).await;
        self.observe("set_many", result)
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.admit()?;
        let result = self.remote.delete(key).await;
        self.observe("delete", result)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.admit()?;
        let result = self.remote.exists(key).await;
        self.observe("exists", result)
    }

    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.admit()?;
        let result = self.remote.ttl(key).await;
        self.observe("ttl", result)
    }

    /// Deletes every key matching `pattern` with an incremental scan.
    ///
    /// Each `SCAN` step asks for `scan_batch_size` keys and the keys it
    /// returns are removed with one multi-key `DEL`. The iteration stops at
    /// the first failing step; keys removed before it are still reported.
    pub async fn scan_delete(&self, pattern: &Pattern) -> ScanDelete {
        let mut removed = Vec::new();
        let error = self.scan_delete_into(pattern, &mut removed).await.err();
        ScanDelete { removed, error }
    }

    async fn scan_delete_into(&self, pattern: &Pattern, removed: &mut Vec<String>) -> Result<()> {
        let scan_match = pattern.scan_match();
        let mut cursor = 0;
        loop {
            self.admit()?;
            let result = self
                .remote
                .scan(cursor, &scan_match, self.scan_batch_size)
                .await;
            let (next, keys) = self.observe("scan", result)?;

            if !keys.is_empty() {
                let result = self.remote.delete_many(&keys).await;
                self.observe("delete_many", result)?;
                removed.extend(keys);
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(())
    }

    pub async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.admit()?;
        let result = self.remote.increment_by(key, amount).await;
        self.observe("increment", result)
    }

    pub async fn decrement(&self, key: &str, amount: i64) -> Result<i64> {
        self.admit()?;
        let result = self.remote.decrement_by(key, amount).await;
        self.observe("decrement", result)
    }

    /// Checks connectivity. A successful ping after the cooldown recovers the tier.
    pub async fn ping(&self) -> Result<()> {
        self.admit()?;
        let result = self.remote.ping().await;
        self.observe("ping", result)
    }

    /// Releases the connection. No I/O is issued afterwards.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.remote.close().await
    }
}
