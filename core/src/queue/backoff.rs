//! Retry delays
//!
//! Exponential growth capped at `max_delay`, spread by a symmetric jitter so
//! events that failed together do not come back together. The jitter source
//! is a lock-free xorshift64 generator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor per retry
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// No delay between retries
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Delay before retry number `retry`, jittered
    pub fn delay(&self, retry: u32, jitter: &Jitter) -> Duration {
        let base = self.base_delay(retry);
        let factor = self.jitter_factor.clamp(0.0, 1.0);
        if factor == 0.0 || base.is_zero() {
            return base;
        }

        // Uniform in [-factor, +factor]
        let spread = (jitter.next_unit() * 2.0 - 1.0) * factor;
        let secs = base.as_secs_f64() * (1.0 + spread);
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(base)
    }
}

/// Lock-free xorshift64 generator
pub struct Jitter {
    state: AtomicU64,
}

impl Jitter {
    /// Seed from the system clock
    pub fn new() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        Self::with_seed(seed)
    }

    /// Fixed seed, for reproducible tests
    pub fn with_seed(seed: u64) -> Self {
        Self {
            // xorshift never leaves zero
            state: AtomicU64::new(seed | 1),
        }
    }

    fn next_u64(&self) -> u64 {
        loop {
            let old = self.state.load(Ordering::Acquire);
            let mut x = old;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            if self
                .state
                .compare_exchange_weak(old, x, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return x;
            }
        }
    }

    /// Uniform value in [0, 1)
    pub fn next_unit(&self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_grows_and_caps() {
        let config = BackoffConfig::default();
        assert_eq!(config.base_delay(1), Duration::from_millis(100));
        assert_eq!(config.base_delay(2), Duration::from_millis(200));
        assert_eq!(config.base_delay(3), Duration::from_millis(400));
        assert_eq!(config.base_delay(30), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let config = BackoffConfig::default();
        let jitter = Jitter::with_seed(42);
        for _ in 0..1000 {
            let delay = config.delay(1, &jitter);
            assert!(delay >= Duration::from_millis(90), "{delay:?}");
            assert!(delay <= Duration::from_millis(110), "{delay:?}");
        }
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let config = BackoffConfig::immediate();
        let jitter = Jitter::with_seed(7);
        assert_eq!(config.delay(1, &jitter), Duration::ZERO);
        assert_eq!(config.delay(3, &jitter), Duration::ZERO);
    }

    #[test]
    fn test_unit_range() {
        let jitter = Jitter::with_seed(0);
        for _ in 0..1000 {
            let value = jitter.next_unit();
            assert!((0.0..1.0).contains(&value));
        }
    }
}
