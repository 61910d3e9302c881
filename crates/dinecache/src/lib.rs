//! Resilient two-tier cache for restaurant-operations read models.
//!
//! Build a [`CacheOrchestrator`] from a [`Config`], a durable tier and a
//! metrics sink, then share clones of it with the services that cache
//! query results.

pub mod cache;
pub mod config;

pub use cache::CacheOrchestrator;
pub use config::Config;
