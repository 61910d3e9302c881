//! Redis durable tier.
//!
//! Provides the production [`RemoteStore`](dinecache_core::cache::RemoteStore)
//! backed by a pooled Redis connection.

mod error;
mod store;

pub use store::RedisStore;
