//! Two-tier cache.
//!
//! The orchestrator combines the in-process [`memory`] tier with a durable
//! tier reached through [`dinecache_core::cache::RemoteStore`]. The durable
//! backends are selected via feature flags and can be enabled together.
//!
//! # Feature Flags
//!
//! - `redis` (default): Redis durable tier using the redis crate
//! - `inmemory` (default): in-process durable tier for development and tests

pub mod l2;
pub mod memory;
pub mod metrics;
pub mod orchestrator;

#[cfg(feature = "inmemory")]
pub mod inmemory;

#[cfg(feature = "redis")]
pub mod redis_impl;

pub use l2::{L2Store, DEFAULT_SCAN_BATCH_SIZE};
pub use memory::MemoryStore;
#[cfg(any(test, feature = "inmemory"))]
pub use self::metrics::CountingMetrics;
pub use self::metrics::{NoopMetrics, RecorderMetrics, TracingMetrics};
pub use orchestrator::CacheOrchestrator;

#[cfg(feature = "inmemory")]
pub use inmemory::InMemoryRemoteStore;

#[cfg(feature = "redis")]
pub use redis_impl::RedisStore;
