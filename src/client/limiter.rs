//! Token-bucket rate limiter.
//!
//! The bucket holds up to `burst` permits and refills continuously at
//! `per_minute / 60` permits per second. Waiting is cancellation-aware so a
//! Ctrl-C never sits behind a long refill.

use crate::cancel::CancellationToken;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    per_second: f64,
    burst: f64,
}

impl RateLimiter {
    pub const DEFAULT_PER_MINUTE: u32 = 50;
    pub const DEFAULT_BURST: u32 = 10;

    /// A full bucket of `burst` permits refilled at `per_minute`.
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            per_second: f64::from(per_minute.max(1)) / 60.0,
            burst,
        }
    }

    /// Take a permit now, or report how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.per_second))
        }
    }

    /// Wait for a permit. Returns `false` if cancelled while waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            match self.try_acquire() {
                Ok(()) => return true,
                Err(wait) => {
                    if !cancel.sleep(wait).await {
                        return false;
                    }
                }
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PER_MINUTE, Self::DEFAULT_BURST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_available_immediately() {
        let limiter = RateLimiter::new(60, 3);
        for _ in 0..3 {
            assert!(limiter.try_acquire().is_ok());
        }
        let wait = limiter.try_acquire().unwrap_err();
        // one permit per second at 60/min
        assert!(wait > Duration::from_millis(900) && wait <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        // 100 permits per second
        let limiter = RateLimiter::new(6000, 1);
        let cancel = CancellationToken::new();
        assert!(limiter.acquire(&cancel).await);
        let start = Instant::now();
        assert!(limiter.acquire(&cancel).await);
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn cancelled_wait_returns_false() {
        let limiter = RateLimiter::new(1, 1);
        let cancel = CancellationToken::new();
        assert!(limiter.acquire(&cancel).await);
        cancel.cancel();
        assert!(!limiter.acquire(&cancel).await);
    }
}
