//! Overflow-safe expiry deadlines.
//!
//! TTLs and cooldowns come from callers and configuration, so they can be
//! arbitrarily large (`Duration::MAX` included). Adding them to an
//! [`Instant`] directly would panic.

use std::time::Duration;

use tokio::time::Instant;

/// Longest offset a deadline is placed in the future (about 30 years).
///
/// Anything longer is indistinguishable from "never" for a cache.
pub const MAX_DEADLINE_OFFSET: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Returns `now + after`, clamping `after` to [`MAX_DEADLINE_OFFSET`].
pub fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(MAX_DEADLINE_OFFSET)).unwrap_or(now)
}
