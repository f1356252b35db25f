//! Retry/backoff controller.
//!
//! Stateless decisions over a step's `RetryConfig`: whether a failed attempt
//! gets another try, and how long to wait before it. Between attempts the
//! step runner persists the step as `Scheduled` with the next attempt time,
//! then waits the delay out on the runtime.

use std::time::Duration;

use runloom_types::retry::{Backoff, RetryConfig};

/// Retry decisions for one step occurrence.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    config: RetryConfig,
}

impl RetrySchedule {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Whether another attempt remains after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_attempts()
    }

    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// Fixed backoff always returns the base delay; exponential doubles per
    /// completed attempt: base, 2x, 4x, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.delay.as_duration();
        match self.config.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor)
            }
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_never_retries() {
        let schedule = RetrySchedule::new(RetryConfig::default());
        assert_eq!(schedule.max_attempts(), 1);
        assert!(!schedule.should_retry(1));
    }

    #[test]
    fn retries_bound_attempts() {
        let schedule = RetrySchedule::new(RetryConfig::fixed(2, Duration::from_millis(10)));
        assert_eq!(schedule.max_attempts(), 3);
        assert!(schedule.should_retry(1));
        assert!(schedule.should_retry(2));
        assert!(!schedule.should_retry(3));
        assert!(!schedule.should_retry(4));
    }

    #[test]
    fn fixed_delay_is_constant() {
        let schedule = RetrySchedule::new(RetryConfig::fixed(3, Duration::from_millis(500)));
        for attempt in 1..=3 {
            assert_eq!(schedule.delay_for(attempt), Duration::from_millis(500));
        }
    }

    #[test]
    fn exponential_delay_doubles() {
        let schedule = RetrySchedule::new(RetryConfig::exponential(4, Duration::from_millis(100)));
        assert_eq!(schedule.delay_for(1), Duration::from_millis(100));
        assert_eq!(schedule.delay_for(2), Duration::from_millis(200));
        assert_eq!(schedule.delay_for(3), Duration::from_millis(400));
        assert_eq!(schedule.delay_for(4), Duration::from_millis(800));
    }
}
