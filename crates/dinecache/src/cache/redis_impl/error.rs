//! Classification of Redis failures.

use dinecache_core::cache::CacheError;

/// Converts a Redis error raised by `command`.
///
/// Transport failures become `ConnectionFailed`; error replies and type
/// mismatches become `OperationFailed`.
pub fn redis_error(command: &'static str, err: redis::RedisError) -> CacheError {
    let message = format!("{command}: {err}");
    let transport = err.is_io_error()
        || err.is_connection_refusal()
        || err.is_timeout()
        || err.is_connection_dropped();
    if transport {
        CacheError::ConnectionFailed(message)
    } else {
        CacheError::OperationFailed(message)
    }
}
