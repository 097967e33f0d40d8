//! Exponential backoff with jitter.

use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Computes the sleep between generation attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Delay after the given failed attempt (1-based), before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.config.base_delay_ms as f64 * self.config.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(millis.min(self.config.max_delay_ms as f64) as u64)
    }

    /// Delay after the given failed attempt, with random jitter applied.
    ///
    /// Never exceeds the configured cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        let millis = (base * factor).clamp(0.0, self.config.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(jitter: f64) -> Backoff {
        Backoff::new(RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter,
            attempt_timeout_ms: 1_000,
        })
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let b = backoff(0.0);
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(400));
        assert_eq!(b.delay(5), Duration::from_millis(1_000));
        assert_eq!(b.delay(40), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let b = backoff(0.2);
        for _ in 0..100 {
            let d = b.delay(2).as_millis();
            assert!((159..=240).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let b = Backoff::new(RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        });
        assert_eq!(b.max_attempts(), 1);
    }
}
