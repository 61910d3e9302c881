//! Availability state machine for the durable tier.
//!
//! ```text
//! Available --(consecutive failures >= threshold)--> Degraded
//! Degraded  --(cooldown elapsed AND next attempt succeeds)--> Available
//! Degraded  --(cooldown elapsed AND next attempt fails)--> Degraded (cooldown re-armed)
//! ```
//!
//! While degraded and inside the cooldown window, [`Availability::permits_attempt`]
//! returns false and callers must not issue any I/O.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use super::deadline::{deadline_after, MAX_DEADLINE_OFFSET};

/// Default number of consecutive failures that trips the durable tier.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default time the durable tier is skipped after tripping.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Status of the durable tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierStatus {
    Available,
    Degraded,
}

impl fmt::Display for TierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// A status change produced by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Degraded,
    Recovered,
}

/// Thresholds driving the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityPolicy {
    /// Consecutive failures required to degrade. Never lower than 1.
    pub failure_threshold: u32,
    /// How long the tier is skipped once degraded. Never longer than
    /// [`MAX_DEADLINE_OFFSET`].
    pub cooldown: Duration,
}

impl AvailabilityPolicy {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown: cooldown.min(MAX_DEADLINE_OFFSET),
        }
    }
}

impl Default for AvailabilityPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

/// Tracks the durable tier's status, consecutive failures and cooldown deadline.
#[derive(Debug, Clone)]
pub struct Availability {
    policy: AvailabilityPolicy,
    status: TierStatus,
    consecutive_failures: u32,
    degraded_until: Option<Instant>,
}

impl Availability {
    pub fn new(policy: AvailabilityPolicy) -> Self {
        Self {
            policy,
            status: TierStatus::Available,
            consecutive_failures: 0,
            degraded_until: None,
        }
    }

    pub fn status(&self) -> TierStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn degraded_until(&self) -> Option<Instant> {
        self.degraded_until
    }

    /// Returns true if an operation may be attempted at `now`.
    pub fn permits_attempt(&self, now: Instant) -> bool {
        match self.status {
            TierStatus::Available => true,
            TierStatus::Degraded => self.degraded_until.is_none_or(|until| now >= until),
        }
    }

    /// Records a successful operation.
    pub fn record_success(&mut self) -> Option<Transition> {
        self.consecutive_failures = 0;
        match self.status {
            TierStatus::Available => None,
            TierStatus::Degraded => {
                self.status = TierStatus::Available;
                self.degraded_until = None;
                Some(Transition::Recovered)
            }
        }
    }

    /// Records a failed operation at `now`.
    pub fn record_failure(&mut self, now: Instant) -> Option<Transition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.status {
            TierStatus::Available if self.consecutive_failures >= self.policy.failure_threshold => {
                self.status = TierStatus::Degraded;
                self.degraded_until = Some(deadline_after(now, self.policy.cooldown));
                Some(Transition::Degraded)
            }
            TierStatus::Available => None,
            TierStatus::Degraded => {
                // Failed attempt after the cooldown
                self.degraded_until = Some(deadline_after(now, self.policy.cooldown));
                None
            }
        }
    }
}

impl Default for Availability {
    fn default() -> Self {
        Self::new(AvailabilityPolicy::default())
    }
}
