//! Exponential backoff with ±30% jitter

use rand::Rng;
use std::time::Duration;

/// Default attempts including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(50);

/// Default delay cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(2_000);

/// Exponent cap, 2^20 already dwarfs any sane cap
const MAX_EXPONENT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Jitter fraction, 0.3 = ±30%
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter: 0.3,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Un-jittered delay after failed attempt number `attempt` (0-based)
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(MAX_EXPONENT));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Jittered delay, never above `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = self.base_delay_for(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return capped;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        capped.mul_f64(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_and_cap() {
        let p = BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(1000), 5);
        assert_eq!(p.base_delay_for(0), Duration::from_millis(100));
        assert_eq!(p.base_delay_for(1), Duration::from_millis(200));
        assert_eq!(p.base_delay_for(3), Duration::from_millis(800));
        assert_eq!(p.base_delay_for(4), Duration::from_millis(1000));
        assert_eq!(p.base_delay_for(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10), 5);
        for _ in 0..200 {
            let d = p.delay_for(1);
            assert!(d >= Duration::from_millis(139) && d <= Duration::from_millis(261), "{:?}", d);
        }
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let p = BackoffPolicy::new(Duration::from_millis(500), Duration::from_millis(500), 5);
        for _ in 0..100 {
            assert!(p.delay_for(3) <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_min_one_attempt() {
        assert_eq!(BackoffPolicy::new(Duration::ZERO, Duration::ZERO, 0).max_attempts, 1);
    }
}
