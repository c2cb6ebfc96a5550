//! Retry policy for page fetches
//!
//! Exponential backoff with uniform jitter. The policy is a plain value: the
//! delay for a given attempt can be computed without sleeping, and the random
//! sample can be injected so tests are deterministic.

use crate::error::FetchError;
use bna_common::{BnaError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_JITTER: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per page, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Upper bound on the exponential part of the delay
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the backoff, in `[0, 1]`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(BnaError::config("retry max_attempts must be at least 1"));
        }
        if self.base_delay > self.max_delay {
            return Err(BnaError::config(format!(
                "retry base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(BnaError::invalid_value(
                "ETL_RETRY_JITTER",
                self.jitter.to_string(),
            ));
        }
        Ok(())
    }

    /// Backoff after failed attempt number `attempt` (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff plus `jitter * backoff * sample`, with `sample` in `[0, 1]`
    pub fn delay_with_jitter(&self, attempt: u32, sample: f64) -> Duration {
        let backoff = self.backoff(attempt);
        let spread = self.jitter * sample.clamp(0.0, 1.0);
        backoff + backoff.mul_f64(spread)
    }

    /// Delay to sleep after failed attempt number `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.jitter <= 0.0 {
            return self.backoff(attempt);
        }
        let sample: f64 = rand::rng().random_range(0.0..=1.0);
        self.delay_with_jitter(attempt, sample)
    }

    /// Whether a page should be tried again after attempt number `attempt` failed
    pub fn should_retry(&self, attempt: u32, err: &FetchError) -> bool {
        err.is_transient() && attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1000))
            .with_jitter(0.5)
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = policy();
        assert_eq!(p.backoff(5), Duration::from_millis(1000));
        assert_eq!(p.backoff(40), Duration::from_millis(1000));
        assert_eq!(p.backoff(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(2, 0.0), Duration::from_millis(200));
        assert_eq!(p.delay_with_jitter(2, 1.0), Duration::from_millis(300));
        // samples outside [0, 1] are clamped
        assert_eq!(p.delay_with_jitter(2, 7.0), Duration::from_millis(300));

        for _ in 0..100 {
            let d = p.delay_for(3);
            assert!(d >= Duration::from_millis(400) && d <= Duration::from_millis(600));
        }
    }

    #[test]
    fn test_should_retry() {
        let p = policy().with_max_attempts(3);
        let transient = FetchError::from_status(503, "");
        let terminal = FetchError::from_status(404, "");

        assert!(p.should_retry(1, &transient));
        assert!(p.should_retry(2, &transient));
        assert!(!p.should_retry(3, &transient));
        assert!(!p.should_retry(1, &terminal));
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::default().with_max_attempts(0).validate().is_err());
        assert!(RetryPolicy::default().with_jitter(1.5).validate().is_err());
        assert!(RetryPolicy::default()
            .with_base_delay(Duration::from_secs(120))
            .validate()
            .is_err());
    }
}
