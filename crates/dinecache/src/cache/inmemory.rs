//! In-process durable tier.
//!
//! Behaves like a single Redis node for the commands the cache uses, which
//! makes it suitable for local development and tests. It counts every call
//! that reaches it and can be told to fail, so callers can check both that a
//! degraded tier receives no traffic and that failures are absorbed.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use dinecache_core::cache::{
    deadline_after, pattern_matches, CacheError, RemoteEntry, RemoteStore, Result,
};

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// In-process [`RemoteStore`] with call counting and failure injection.
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    entries: Mutex<BTreeMap<String, StoredValue>>,
    calls: AtomicUsize,
    calls_by_op: Mutex<HashMap<&'static str, usize>>,
    failing: AtomicBool,
    /// Per-operation budgets of successful calls before failures start.
    failing_after: Mutex<HashMap<&'static str, usize>>,
    closed: AtomicBool,
    /// Open scan cursors, each resuming after the last key it examined.
    cursors: Mutex<HashMap<u64, String>>,
    next_cursor: AtomicU64,
}

impl InMemoryRemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Lets `op` succeed `successes` more times, then fails every later call of it.
    pub fn fail_after(&self, op: &'static str, successes: usize) {
        let budget = self.calls_of(op) + successes;
        self.failing_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op, budget);
    }

    /// Total number of calls that reached the store.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls of one operation (e.g. `"get"`, `"scan"`).
    pub fn calls_of(&self, op: &str) -> usize {
        self.calls_by_op
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the stored value, ignoring failure injection and call counting.
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        self.entries()
            .get(key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.value.clone())
    }

    /// Returns the number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries()
            .values()
            .filter(|stored| stored.is_live(now))
            .count()
    }

    /// Returns true if no live keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, StoredValue>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts the call and applies failure injection.
    fn begin(&self, op: &'static str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let calls = {
            let mut calls_by_op = self.calls_by_op.lock().unwrap_or_else(PoisonError::into_inner);
            let calls = calls_by_op.entry(op).or_default();
            *calls += 1;
            *calls
        };

        if self.is_closed() {
            return Err(CacheError::ConnectionFailed("connection closed".to_string()));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::ConnectionFailed(format!(
                "injected failure on {op}"
            )));
        }
        let budget = self
            .failing_after
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op)
            .copied();
        if budget.is_some_and(|budget| calls > budget) {
            return Err(CacheError::ConnectionFailed(format!(
                "injected failure on {op}"
            )));
        }
        Ok(())
    }

    fn live_entry(&self, key: &str) -> Option<RemoteEntry> {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(stored) if stored.is_live(now) => {
                let ttl = stored.expires_at.map(|at| at.saturating_duration_since(now));
                return Some(RemoteEntry::new(stored.value.clone(), ttl));
            }
            Some(_) => {}
            None => return None,
        }
        entries.remove(key);
        None
    }

    fn add(&self, key: &str, amount: i64) -> Result<i64> {
        let now = Instant::now();
        let mut entries = self.entries();
        let current = match entries.get(key) {
            Some(stored) if stored.is_live(now) => std::str::from_utf8(&stored.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    CacheError::OperationFailed(
                        "value is not an integer or out of range".to_string(),
                    )
                })?,
            _ => 0,
        };
        let next = current.checked_add(amount).ok_or_else(|| {
            CacheError::OperationFailed("increment or decrement would overflow".to_string())
        })?;
        let expires_at = entries
            .get(key)
            .filter(|stored| stored.is_live(now))
            .and_then(|stored| stored.expires_at);
        entries.insert(
            key.to_string(),
            StoredValue {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }

    fn insert(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let stored = StoredValue {
            value,
            expires_at: Some(deadline_after(Instant::now(), ttl)),
        };
        self.entries().insert(key.to_string(), stored);
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>> {
        self.begin("get")?;
        Ok(self.live_entry(key))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<RemoteEntry>>> {
        self.begin("get_many")?;
        Ok(keys.iter().map(|key| self.live_entry(key)).collect())
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.begin("set_with_ttl")?;
        self.insert(key, value.to_vec(), ttl);
        Ok(())
    }

    async fn set_many_with_ttl(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Duration,
    ) -> Result<()> {
        self.begin("set_many_with_ttl")?;
        for (key, value) in entries {
            self.insert(key, value.clone(), ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.begin("delete")?;
        let now = Instant::now();
        Ok(self
            .entries()
            .remove(key)
            .is_some_and(|stored| stored.is_live(now)))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        self.begin("delete_many")?;
        let now = Instant::now();
        let mut entries = self.entries();
        let removed = keys
            .iter()
            .filter(|key| {
                entries
                    .remove(key.as_str())
                    .is_some_and(|stored| stored.is_live(now))
            })
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.begin("exists")?;
        Ok(self.live_entry(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.begin("ttl")?;
        let now = Instant::now();
        Ok(self
            .entries()
            .get(key)
            .filter(|stored| stored.is_live(now))
            .and_then(|stored| stored.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.begin("scan")?;
        let now = Instant::now();
        let glob = unescape_redis_glob(pattern);

        let start = if cursor == 0 {
            Bound::Unbounded
        } else {
            let last = self
                .cursors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&cursor)
                .ok_or_else(|| CacheError::OperationFailed("invalid cursor".to_string()))?;
            Bound::Excluded(last)
        };

        let entries = self.entries();
        let examined: Vec<(&String, &StoredValue)> = entries
            .range::<String, _>((start, Bound::Unbounded))
            .take(count.max(1))
            .collect();

        let keys: Vec<String> = examined
            .iter()
            .filter(|(key, stored)| stored.is_live(now) && pattern_matches(&glob, key))
            .map(|(key, _)| (*key).clone())
            .collect();

        let has_more = examined.last().is_some_and(|(last, _)| {
            entries
                .range::<String, _>((Bound::Excluded(*last), Bound::Unbounded))
                .next()
                .is_some()
        });
        let next = match examined.last() {
            Some((last, _)) if has_more => {
                let id = self.next_cursor.fetch_add(1, Ordering::SeqCst) + 1;
                self.cursors
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id, (*last).clone());
                id
            }
            _ => 0,
        };
        Ok((next, keys))
    }

    async fn increment_by(&self, key: &str, amount: i64) -> Result<i64> {
        self.begin("increment_by")?;
        self.add(key, amount)
    }

    async fn decrement_by(&self, key: &str, amount: i64) -> Result<i64> {
        self.begin("decrement_by")?;
        let amount = amount.checked_neg().ok_or_else(|| {
            CacheError::OperationFailed("decrement would overflow".to_string())
        })?;
        self.add(key, amount)
    }

    async fn ping(&self) -> Result<()> {
        self.begin("ping")
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Reverses the escaping applied to SCAN match strings.
fn unescape_redis_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}
