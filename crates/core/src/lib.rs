//! Pure building blocks for the dinecache two-tier cache.
//!
//! Nothing in this crate performs I/O. Key construction, pattern parsing,
//! the L2 availability state machine, value serialization, and the traits
//! implemented by concrete backends all live here so they can be tested
//! without a runtime or a network.

pub mod cache;
