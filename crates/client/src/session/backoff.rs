//! Reconnect schedule.

use std::time::Duration;

/// Fixed reconnect policy. These are system parameters, not settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts after which the session gives up
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// How long a single connection attempt may take
    pub attempt_timeout: Duration,
}

impl ReconnectPolicy {
    pub const STANDARD: ReconnectPolicy = ReconnectPolicy {
        max_attempts: 10,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(5),
        attempt_timeout: Duration::from_secs(10),
    };

    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_delay, self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Doubling backoff: `base * 2^attempt`, never more than `cap`.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(cap, |delay| delay.min(cap))
}
