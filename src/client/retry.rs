//! Retry policy with exponential backoff and jitter.
//!
//! Delay before the retry that follows attempt `n` (0-based) is
//! `base · 2^n + jitter`, with jitter uniform in `[0, base)`. Rate-limit
//! failures use `10 · base` as their base so a throttled provider gets room
//! to recover: with the default 1 s base that is 10–20 s, then 20–30 s.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Base multiplier applied to rate-limit failures.
    pub rate_limit_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            rate_limit_multiplier: 10,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    fn base(&self, rate_limited: bool) -> Duration {
        if rate_limited {
            self.base_delay.saturating_mul(self.rate_limit_multiplier)
        } else {
            self.base_delay
        }
    }

    /// `[min, max)` bounds of the delay after `attempt`.
    pub fn delay_range(&self, attempt: u32, rate_limited: bool) -> (Duration, Duration) {
        let base = self.base(rate_limited);
        let min = base.saturating_mul(2u32.saturating_pow(attempt));
        (min, min.saturating_add(base))
    }

    /// A concrete delay for the retry after `attempt`.
    pub fn backoff(&self, attempt: u32, rate_limited: bool) -> Duration {
        let base = self.base(rate_limited);
        let (min, _) = self.delay_range(attempt, rate_limited);
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        min.saturating_add(base.mul_f64(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_range(0, false),
            (Duration::from_secs(1), Duration::from_secs(2))
        );
        assert_eq!(
            policy.delay_range(2, false),
            (Duration::from_secs(4), Duration::from_secs(5))
        );
    }

    #[test]
    fn rate_limits_back_off_ten_times_longer() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_range(1, true),
            (Duration::from_secs(20), Duration::from_secs(30))
        );
    }

    #[test]
    fn backoff_stays_in_range() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        for attempt in 0..3 {
            let (min, max) = policy.delay_range(attempt, false);
            for _ in 0..20 {
                let d = policy.backoff(attempt, false);
                assert!(d >= min && d < max, "{d:?} not in [{min:?}, {max:?})");
            }
        }
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
