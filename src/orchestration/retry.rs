//! # Retry Policy
//!
//! Decides, after a transient handler failure, whether a task is requeued
//! with a delay or failed for good. Attempts are counted by the claim, so a
//! task on its `n`th attempt has `execution_attempts == n`.

use chrono::{DateTime, Duration, Utc};

use crate::config::BackoffConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { next_execution: DateTime<Utc> },
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    config: BackoffConfig,
}

impl RetryPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// `min(base * multiplier^(attempts - 1), max)`
    pub fn backoff_delay(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).max(0);
        let raw = self.config.base_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = raw.min(self.config.max_delay_ms as f64).max(0.0);
        Duration::milliseconds(capped as i64)
    }

    pub fn decide(
        &self,
        attempts: i32,
        retry_after: Option<std::time::Duration>,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if attempts >= self.config.max_attempts as i32 {
            return RetryDecision::Exhausted;
        }

        // A requested delay past the representable range falls back to backoff.
        let next_execution = retry_after
            .and_then(|requested| Duration::from_std(requested).ok())
            .and_then(|delay| now.checked_add_signed(delay))
            .or_else(|| now.checked_add_signed(self.backoff_delay(attempts)));
        match next_execution {
            Some(next_execution) => RetryDecision::Retry { next_execution },
            None => RetryDecision::Exhausted,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(BackoffConfig {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 5000,
            multiplier: 2.0,
        })
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.backoff_delay(1), Duration::milliseconds(1000));
        assert_eq!(policy.backoff_delay(2), Duration::milliseconds(2000));
        assert_eq!(policy.backoff_delay(3), Duration::milliseconds(4000));
        assert_eq!(policy.backoff_delay(4), Duration::milliseconds(5000));
        assert_eq!(policy.backoff_delay(0), Duration::milliseconds(1000));
    }

    #[test]
    fn test_retry_boundary() {
        let policy = policy();
        let now = Utc::now();
        assert_eq!(
            policy.decide(1, None, now),
            RetryDecision::Retry {
                next_execution: now + Duration::milliseconds(1000)
            }
        );
        assert!(matches!(
            policy.decide(2, None, now),
            RetryDecision::Retry { .. }
        ));
        assert_eq!(policy.decide(3, None, now), RetryDecision::Exhausted);
        assert_eq!(policy.decide(4, None, now), RetryDecision::Exhausted);
    }

    #[test]
    fn test_explicit_retry_after_wins() {
        let now = Utc::now();
        assert_eq!(
            policy().decide(1, Some(std::time::Duration::from_secs(30)), now),
            RetryDecision::Retry {
                next_execution: now + Duration::seconds(30)
            }
        );
    }

    #[test]
    fn test_unrepresentable_retry_after_falls_back_to_backoff() {
        let now = Utc::now();
        let far = std::time::Duration::from_secs(10_u64.pow(13));
        assert_eq!(
            policy().decide(1, Some(far), now),
            RetryDecision::Retry {
                next_execution: now + Duration::milliseconds(1000)
            }
        );
    }
}
