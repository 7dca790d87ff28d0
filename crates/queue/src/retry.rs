//! Retry policy for batch jobs.

use std::time::Duration;

use fanwave_common::config::DeliveryConfig;

/// Retry policy with exponential backoff.
///
/// `attempt` counts processing attempts already made, so the first retry is
/// decided with `attempt = 1`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of processing attempts per job.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on the backoff delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Build the policy from delivery configuration.
    #[must_use]
    pub fn from_delivery(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Whether a job that has made `attempts` processing attempts gets
    /// another one.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Backoff delay after the given attempt (1-indexed).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let delay = Duration::from_secs_f64(delay_secs);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}
