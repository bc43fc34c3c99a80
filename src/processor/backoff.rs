//! Retry delay calculation.

use std::time::Duration;

/// Exponential backoff policy for failed dispatch attempts.
///
/// The delay after attempt `n` is `min(base * 2^n, max)`. No jitter: retry
/// times are persisted per job, so thundering-herd concerns do not apply the
/// way they would for connection retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
}

impl RetryPolicy {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms),
        }
    }

    /// Delay before the next attempt, given the number of attempts made so
    /// far. Non-decreasing in `attempts` and bounded by the configured max.
    pub fn delay_for(&self, attempts: i32) -> Duration {
        let exp = attempts.clamp(0, 62) as u32;
        let factor = 1u64.checked_shl(exp).unwrap_or(u64::MAX);
        let delay_ms = (self.base.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 1s base, capped at 24h
        Self::new(1_000, 24 * 60 * 60 * 1_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(1_000, 86_400_000);

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10), Duration::from_secs(1024));
    }

    #[test]
    fn test_delay_non_decreasing() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempts in 0..100 {
            let delay = policy.delay_for(attempts);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn test_delay_bounded_by_max() {
        let policy = RetryPolicy::new(1_000, 86_400_000);

        assert_eq!(policy.delay_for(17), Duration::from_secs(86_400));
        assert_eq!(policy.delay_for(1_000), Duration::from_secs(86_400));
        assert_eq!(policy.delay_for(i32::MAX), Duration::from_secs(86_400));
    }

    #[test]
    fn test_negative_attempts_clamped() {
        let policy = RetryPolicy::new(1_000, 86_400_000);
        assert_eq!(policy.delay_for(-5), Duration::from_secs(1));
    }
}
