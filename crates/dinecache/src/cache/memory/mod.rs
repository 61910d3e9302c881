//! In-memory L1 tier.
//!
//! Provides a bounded, TTL-capped in-process store that never fails its
//! caller.

mod store;

pub use store::MemoryStore;
