use thiserror::Error;

use super::serialization::SerializationError;

/// Errors that can occur during cache operations.
///
/// These never reach business callers: the orchestrator absorbs them,
/// logs them and falls back to the local tier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The durable tier is degraded and was skipped without any I/O.
    #[error("Cache tier unavailable")]
    Unavailable,
}

impl CacheError {
    /// Returns true for the degraded-tier sentinel.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl From<SerializationError> for CacheError {
    fn from(err: SerializationError) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
