//! Retry decisions and linear backoff for failing steps.
//!
//! Stateless: the executor tracks the attempt count and asks the handler
//! whether to try again and how long to wait first. The wait after the n-th
//! failed attempt is `backoffMultiplier * 1000ms * n`.

use std::time::Duration;

use flowdeck_types::workflow::RetryPolicy;

/// Base unit of the backoff formula.
pub const BACKOFF_BASE_MS: f64 = 1000.0;

/// Stateless retry handler for step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt is allowed after `attempts` invocations.
    ///
    /// `attempts` counts invocations made so far (1 after the first failure).
    pub fn should_retry(policy: &RetryPolicy, attempts: u32) -> bool {
        attempts < policy.max_attempts
    }

    /// Wait before the next attempt, given `attempts` failed invocations so far.
    pub fn backoff_delay(policy: &RetryPolicy, attempts: u32) -> Duration {
        let multiplier = if policy.backoff_multiplier.is_finite() {
            policy.backoff_multiplier.max(0.0)
        } else {
            0.0
        };
        let millis = multiplier * BACKOFF_BASE_MS * f64::from(attempts);
        Duration::from_millis(millis.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, backoff_multiplier: f64) -> RetryPolicy {
        RetryPolicy { max_attempts, backoff_multiplier }
    }

    #[test]
    fn test_should_retry_within_limit() {
        let p = policy(3, 2.0);
        assert!(RetryHandler::should_retry(&p, 1));
        assert!(RetryHandler::should_retry(&p, 2));
    }

    #[test]
    fn test_should_not_retry_at_max() {
        let p = policy(3, 2.0);
        assert!(!RetryHandler::should_retry(&p, 3));
        assert!(!RetryHandler::should_retry(&p, 4));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        assert!(!RetryHandler::should_retry(&policy(1, 2.0), 1));
    }

    #[test]
    fn test_backoff_is_linear() {
        let p = policy(5, 2.0);
        assert_eq!(RetryHandler::backoff_delay(&p, 1), Duration::from_millis(2000));
        assert_eq!(RetryHandler::backoff_delay(&p, 2), Duration::from_millis(4000));
        assert_eq!(RetryHandler::backoff_delay(&p, 3), Duration::from_millis(6000));
    }

    #[test]
    fn test_fractional_and_zero_multiplier() {
        assert_eq!(
            RetryHandler::backoff_delay(&policy(3, 0.25), 2),
            Duration::from_millis(500)
        );
        assert_eq!(RetryHandler::backoff_delay(&policy(3, 0.0), 2), Duration::ZERO);
        assert_eq!(RetryHandler::backoff_delay(&policy(3, f64::NAN), 2), Duration::ZERO);
    }

    #[test]
    fn test_default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(RetryHandler::backoff_delay(&p, 1), Duration::from_secs(2));
    }
}
