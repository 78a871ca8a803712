//! # Exponential Backoff
//!
//! Per-key retry delays for the work queue.
//!
//! The delay doubles with every consecutive failure of the same key and is
//! capped at a maximum.
//! Sequence with the defaults: 5ms, 10ms, 20ms, 40ms, ... 300s (max).

use std::time::Duration;

/// Exponential backoff calculator
///
/// Stateless: the work queue owns the failure count per key and asks for
/// the delay that belongs to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry
    base: Duration,
    /// Upper bound for any delay
    max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(300))
    }
}

impl ExponentialBackoff {
    /// Create a new backoff doubling from `base` up to `max`.
    ///
    /// # Arguments
    ///
    /// * `base` - Delay before the first retry
    /// * `max` - Cap for the sequence
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay for the retry following `failures` consecutive failures.
    ///
    /// `failures` is 1 for the first failure. Zero is treated like one.
    /// Overflowing products saturate at `max`.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        1u32.checked_shl(exponent)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_sequence() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(300));

        assert_eq!(backoff.delay_for(1), Duration::from_millis(5));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(10));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(20));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(40));
        assert_eq!(backoff.delay_for(11), Duration::from_millis(5120));
    }

    #[test]
    fn test_zero_failures_uses_base() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.delay_for(0), Duration::from_millis(5));
    }

    #[test]
    fn test_max_cap() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10));

        assert_eq!(backoff.delay_for(4), Duration::from_secs(8));
        // 16s would exceed the cap
        assert_eq!(backoff.delay_for(5), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(6), Duration::from_secs(10));
    }

    #[test]
    fn test_overflow_saturates() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(600));

        // 2^40 does not fit the multiplier
        assert_eq!(backoff.delay_for(41), Duration::from_secs(600));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(600));
    }
}
