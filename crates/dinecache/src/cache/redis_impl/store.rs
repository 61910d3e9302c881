//! Redis implementation of the durable tier.
//!
//! All commands go through a single [`redis::aio::ConnectionManager`], which
//! multiplexes requests and reconnects on its own. Batched reads use `MGET`,
//! batched writes a pipeline of `SET EX`, and pattern deletion an incremental
//! `SCAN` so no command ever blocks the server on the whole keyspace.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use dinecache_core::cache::{CacheError, RemoteEntry, RemoteStore, Result};

use super::error::redis_error;

/// Redis durable tier using a connection manager for pooling.
pub struct RedisStore {
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Creates a new Redis connection.
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the connection cannot be established.
    pub async fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|err| redis_error("CONNECT", err))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| redis_error("CONNECT", err))?;
        Ok(Self {
            conn: RwLock::new(Some(conn)),
        })
    }

    /// Returns a handle on the shared connection.
    fn connection(&self) -> Result<ConnectionManager> {
        let guard = self
            .conn
            .read()
            .map_err(|_| CacheError::ConnectionFailed("connection lock poisoned".to_string()))?;
        guard
            .clone()
            .ok_or_else(|| CacheError::ConnectionFailed("connection closed".to_string()))
    }
}

/// Longest `EX` sent to Redis. Larger values overflow the server's
/// millisecond expiry clock and are rejected.
const MAX_EX_SECONDS: u64 = u32::MAX as u64;

/// Redis `EX` takes whole seconds and rejects zero.
fn ttl_seconds(ttl: Duration) -> u64 {
    let seconds = ttl.as_secs();
    let seconds = if ttl.subsec_nanos() > 0 {
        seconds.saturating_add(1)
    } else {
        seconds.max(1)
    };
    seconds.min(MAX_EX_SECONDS)
}

/// Interprets a `PTTL` reply: -2 missing, -1 no expiry.
/// Maps a `PTTL` reply: -1 means no expiry, -2 means the key expired after
/// it was read.
fn remaining_ttl(millis: i64) -> Option<Duration> {
    match millis {
        -1 => None,
        millis => Some(Duration::from_millis(u64::try_from(millis).unwrap_or(0))),
    }
}

fn entry(value: Option<Vec<u8>>, pttl: i64) -> Option<RemoteEntry> {
    value.map(|value| RemoteEntry::new(value, remaining_ttl(pttl)))
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>> {
        let mut conn = self.connection()?;
        let (value, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .get(key)
            .pttl(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| redis_error("GET", err))?;
        Ok(entry(value, pttl))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<RemoteEntry>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection()?;
        // Explicit MGET: `AsyncCommands::mget` downgrades single keys to GET,
        // which does not reply with an array.
        let mut pipe = redis::pipe();
        pipe.cmd("MGET").arg(keys);
        for key in keys {
            pipe.pttl(key);
        }
        let replies: Vec<redis::Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|err| redis_error("MGET", err))?;

        let mut replies = replies.into_iter();
        let values: Vec<Option<Vec<u8>>> = match replies.next() {
            Some(reply) => {
                redis::from_redis_value(&reply).map_err(|err| redis_error("MGET", err))?
            }
            None => Vec::new(),
        };
        let pttls = replies
            .map(|reply| redis::from_redis_value::<i64>(&reply))
            .collect::<redis::RedisResult<Vec<i64>>>()
            .map_err(|err| redis_error("PTTL", err))?;
        if values.len() != keys.len() || pttls.len() != keys.len() {
            return Err(CacheError::OperationFailed(format!(
                "MGET: expected {} replies, got {} values and {} TTLs",
                keys.len(),
                values.len(),
                pttls.len()
            )));
        }

        Ok(values
            .into_iter()
            .zip(pttls)
            .map(|(value, pttl)| entry(value, pttl))
            .collect())
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.connection()?;
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds(ttl))
            .await
            .map_err(|err| redis_error("SET", err))?;
        Ok(())
    }

    async fn set_many_with_ttl(
        &self,
        entries: &[(String, Vec<u8>)],
        ttl: Duration,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection()?;
        let seconds = ttl_seconds(ttl);

        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.set_ex(key, value.as_slice(), seconds).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await.map_err(|err| redis_error("SET", err))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let removed: u64 = conn.del(key).await.map_err(|err| redis_error("DEL", err))?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection()?;
        let removed: u64 = conn.del(keys).await.map_err(|err| redis_error("DEL", err))?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let exists: bool = conn.exists(key).await.map_err(|err| redis_error("EXISTS", err))?;
        Ok(exists)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.connection()?;
        // -2: missing, -1: no expiry
        let seconds: i64 = conn.ttl(key).await.map_err(|err| redis_error("TTL", err))?;
        Ok(u64::try_from(seconds).ok().map(Duration::from_secs))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.connection()?;
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|err| redis_error("SCAN", err))?;
        Ok((next, keys))
    }

    async fn increment_by(&self, key: &str, amount: i64) -> Result<i64> {
        let mut conn = self.connection()?;
        let value: i64 = conn.incr(key, amount).await.map_err(|err| redis_error("INCRBY", err))?;
        Ok(value)
    }

    async fn decrement_by(&self, key: &str, amount: i64) -> Result<i64> {
        let mut conn = self.connection()?;
        let value: i64 = conn.decr(key, amount).await.map_err(|err| redis_error("DECRBY", err))?;
        Ok(value)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| redis_error("PING", err))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self
            .conn
            .write()
            .map_err(|_| CacheError::ConnectionFailed("connection lock poisoned".to_string()))?;
        // Dropping the last manager handle closes the multiplexed connection
        guard.take();
        Ok(())
    }
}
