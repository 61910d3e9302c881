use std::time::Duration;

use async_trait::async_trait;

use super::Result;

/// A value read from the durable tier together with its remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub value: Vec<u8>,
    /// Remaining time to live, or `None` if the key never expires.
    pub ttl: Option<Duration>,
}

impl RemoteEntry {
    pub fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self { value, ttl }
    }
}

/// Client contract for the durable, networked key-value tier.
///
/// Implementations report every failure as an error; deciding whether the
/// tier is degraded is the caller's job. Connection and retry policy belong
/// to the implementation.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Gets a value and its remaining TTL in one round trip.
    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>>;

    /// Gets several values and their remaining TTLs in one round trip, in
    /// the order of `keys`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<RemoteEntry>>>;

    /// Sets a value that expires after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Sets several values with the same `ttl` in one pipelined round trip.
    async fn set_many_with_ttl(&self, entries: &[(String, Vec<u8>)], ttl: Duration)
        -> Result<()>;

    /// Deletes a key. Returns true if it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Deletes several keys in one round trip. Returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64>;

    /// Returns true if the key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Returns the remaining time to live, or `None` if the key is missing
    /// or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Runs one step of an incremental scan.
    ///
    /// Returns the next cursor and the keys found in this step. A returned
    /// cursor of `0` ends the iteration.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    /// Atomically adds `amount` to an integer counter and returns the new value.
    async fn increment_by(&self, key: &str, amount: i64) -> Result<i64>;

    /// Atomically subtracts `amount` from an integer counter and returns the new value.
    async fn decrement_by(&self, key: &str, amount: i64) -> Result<i64>;

    /// Checks connectivity.
    async fn ping(&self) -> Result<()>;

    /// Releases the underlying connection. Later calls fail.
    async fn close(&self) -> Result<()>;
}

/// Fire-and-forget metrics sink.
///
/// Implementations must never panic or block the caller.
pub trait MetricsSink: Send + Sync {
    /// Adds `value` to the counter `name`.
    fn increment(&self, name: &str, value: u64, tags: &[(&str, &str)]);

    /// Records a duration for the timer `name`.
    fn timing(&self, name: &str, elapsed: Duration, tags: &[(&str, &str)]);
}
