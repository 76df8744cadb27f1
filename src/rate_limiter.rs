//! Time-gate that lets an action through at most once per interval

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Grants at most one acquisition per `interval`.
///
/// Denied attempts accrue no credit, unlike a token bucket.
pub struct RateLimiter {
    interval: Duration,
    last_allowed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_allowed: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true if at least `interval` has elapsed since the last grant
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Same as [`try_acquire`](Self::try_acquire) with an explicit clock reading
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut last = self.last_allowed.lock();
        let allowed = match *last {
            None => true,
            Some(prev) => now.saturating_duration_since(prev) >= self.interval,
        };
        if allowed {
            // Never move backwards if a caller passes an older reading
            *last = Some(last.map_or(now, |prev| prev.max(now)));
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_allowed() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_second_call_within_interval_denied() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_allowed_after_interval() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.try_acquire_at(start));
        assert!(!limiter.try_acquire_at(start + Duration::from_secs(9)));
        // Boundary is inclusive
        assert!(limiter.try_acquire_at(start + Duration::from_secs(10)));
        assert!(!limiter.try_acquire_at(start + Duration::from_secs(15)));
        assert!(limiter.try_acquire_at(start + Duration::from_secs(20)));
    }

    #[test]
    fn test_allowed_after_real_sleep() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_zero_interval_always_allows() {
        let limiter = RateLimiter::new(Duration::ZERO);
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
    }

    #[test]
    fn test_denied_attempts_do_not_accumulate() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.try_acquire_at(start));
        for s in 1..10 {
            assert!(!limiter.try_acquire_at(start + Duration::from_secs(s)));
        }
        assert!(limiter.try_acquire_at(start + Duration::from_secs(10)));
        assert!(!limiter.try_acquire_at(start + Duration::from_secs(11)));
    }
}
