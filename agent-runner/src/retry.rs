//! Retry policy with exponential backoff

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How often, and how patiently, a failed handler is re-invoked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = fail on first error)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound for a single delay
    pub max_delay_ms: u64,
    /// Random spread applied to each delay, as a fraction (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// No retries
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Backoff before retrying failed `attempt` (1-based): base * 2^(attempt-1), capped, with jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let exp_delay = self.base_delay_ms as f64 * 2.0_f64.powi(exponent);
        let capped = exp_delay.min(self.max_delay_ms as f64);

        let spread = capped * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            max_retries: 20,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(10), Duration::from_millis(5_000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(3).with_base_delay(Duration::from_millis(1_000));
        for _ in 0..50 {
            let delay = policy.delay_for(1).as_millis();
            assert!((800..=1_200).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::new(2);
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!RetryPolicy::none().allows_retry(1));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_retries": 3}"#).unwrap();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay_ms, 500);
    }
}
