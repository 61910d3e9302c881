//! In-process L1 store with LRU eviction and a hard TTL ceiling.
//!
//! Every entry's TTL is capped at the store's `ttl_cap`, so a stale L1 copy
//! can never outlive the cap no matter what TTL the caller asked for.
//! Expired entries are removed lazily when they are read or scanned.
//!
//! The store must stay available to callers unconditionally: a poisoned lock
//! is treated as an empty store instead of an error.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;

use dinecache_core::cache::{deadline_after, Pattern, Tier};

/// A single immutable cache entry.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    origin: Tier,
    ttl: Duration,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: Vec<u8>, origin: Tier, ttl: Duration) -> Self {
        Self {
            value,
            origin,
            ttl,
            expires_at: deadline_after(Instant::now(), ttl),
        }
    }

    /// Returns true if this entry has expired.
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded in-memory L1 store.
///
/// Thread-safe through a `Mutex<LruCache>`; the lock is never held across
/// an `.await`. Concurrent writers to the same key are last-writer-wins.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl_cap: Duration,
}

impl MemoryStore {
    /// Creates a new store.
    ///
    /// # Arguments
    ///
    /// * `max_entries` - Maximum number of entries before LRU eviction kicks in.
    ///   Clamped to at least 1.
    /// * `ttl_cap` - Upper bound applied to every entry's TTL.
    pub fn new(max_entries: usize, ttl_cap: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl_cap,
        }
    }

    /// Returns the TTL ceiling.
    pub fn ttl_cap(&self) -> Duration {
        self.ttl_cap
    }

    /// Returns the effective TTL for a requested one.
    pub fn effective_ttl(&self, requested: Duration) -> Duration {
        requested.min(self.ttl_cap)
    }

    fn lock(&self) -> Option<MutexGuard<'_, LruCache<String, CacheEntry>>> {
        match self.entries.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::warn!("L1 store lock poisoned, treating as empty");
                None
            }
        }
    }

    /// Gets a live value by key.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        entries.pop(key);
        None
    }

    /// Returns the tier a live entry came from.
    pub fn origin(&self, key: &str) -> Option<Tier> {
        let entries = self.lock()?;
        entries
            .peek(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.origin)
    }

    /// Returns the TTL a live entry was stored with.
    pub fn stored_ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.lock()?;
        entries
            .peek(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.ttl)
    }

    /// Stores a value, replacing any previous entry.
    ///
    /// Returns the effective TTL, `min(ttl, ttl_cap)`.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, origin: Tier) -> Duration {
        let ttl = self.effective_ttl(ttl);
        if ttl.is_zero() {
            // Would be born expired
            self.delete(key);
            return ttl;
        }
        if let Some(mut entries) = self.lock() {
            entries.put(key.to_string(), CacheEntry::new(value, origin, ttl));
        }
        ttl
    }

    /// Deletes a key. Returns true if a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let Some(mut entries) = self.lock() else {
            return false;
        };
        entries
            .pop(key)
            .is_some_and(|entry| !entry.is_expired(Instant::now()))
    }

    /// Returns true if a live entry exists for the key.
    pub fn contains(&self, key: &str) -> bool {
        self.origin(key).is_some()
    }

    /// Returns every live key starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.live_keys(|key| key.starts_with(prefix))
    }

    /// Returns every live key matched by `pattern`.
    pub fn keys_matching(&self, pattern: &Pattern) -> Vec<String> {
        self.live_keys(|key| pattern.matches(key))
    }

    /// Removes every live key matched by `pattern` and returns the removed keys.
    ///
    /// This is a linear scan over the store.
    pub fn remove_matching(&self, pattern: &Pattern) -> Vec<String> {
        let keys = match pattern {
            Pattern::Exact(key) => {
                return if self.delete(key) {
                    vec![key.clone()]
                } else {
                    Vec::new()
                };
            }
            Pattern::Prefix(prefix) => self.keys_with_prefix(prefix),
            Pattern::Glob(_) => self.keys_matching(pattern),
        };

        let Some(mut entries) = self.lock() else {
            return Vec::new();
        };
        keys.into_iter()
            .filter(|key| entries.pop(key).is_some())
            .collect()
    }

    /// Removes every entry.
    pub fn flush(&self) {
        if let Some(mut entries) = self.lock() {
            entries.clear();
        }
    }

    /// Returns the number of stored entries, including expired ones not yet collected.
    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collects live keys accepted by `filter`, dropping expired entries on the way.
    fn live_keys<F>(&self, filter: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let Some(mut entries) = self.lock() else {
            return Vec::new();
        };
        let now = Instant::now();

        let mut live = Vec::new();
        let mut expired = Vec::new();
        for (key, entry) in entries.iter() {
            if entry.is_expired(now) {
                expired.push(key.clone());
            } else if filter(key) {
                live.push(key.clone());
            }
        }
        for key in expired {
            entries.pop(&key);
        }
        live
    }
}
