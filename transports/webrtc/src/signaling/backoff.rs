//! Capped exponential backoff for relay reconnects

use std::time::Duration;

/// Reconnect delay policy
///
/// The attempt counter is bumped once per transport failure and saturates at
/// `attempt_ceiling`; the delay for attempt `n` is `initial * 2^(n-1)`,
/// never more than `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay for the first attempt
    pub initial: Duration,

    /// Upper bound for any delay
    pub max: Duration,

    /// Saturation point of the attempt counter
    pub attempt_ceiling: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            attempt_ceiling: 6,
        }
    }
}

impl BackoffPolicy {
    /// Counter value after one more failure
    pub fn next_attempt(&self, attempts: u32) -> u32 {
        attempts.saturating_add(1).min(self.attempt_ceiling)
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}
