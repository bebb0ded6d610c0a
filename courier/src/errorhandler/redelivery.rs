//! Redelivery policy: retry timing, limits, and backoff.

use crate::errors::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded jitter applied on top of the computed delay.
const JITTER_FACTOR: f64 = 0.15;

/// Log level for redelivery diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetryLogLevel {
    /// Logged as an error.
    Error,
    /// Logged as a warning.
    Warn,
    /// Logged at info.
    Info,
    /// Logged at debug.
    #[default]
    Debug,
    /// Not logged.
    Off,
}

impl RetryLogLevel {
    /// Emits a redelivery diagnostic at this level.
    pub fn log(self, exchange_id: uuid::Uuid, attempt: u32, delay: Duration, message: &str) {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Self::Error => {
                tracing::error!(exchange_id = %exchange_id, attempt, delay_ms, "{message}");
            }
            Self::Warn => {
                tracing::warn!(exchange_id = %exchange_id, attempt, delay_ms, "{message}");
            }
            Self::Info => {
                tracing::info!(exchange_id = %exchange_id, attempt, delay_ms, "{message}");
            }
            Self::Debug => {
                tracing::debug!(exchange_id = %exchange_id, attempt, delay_ms, "{message}");
            }
            Self::Off => {}
        }
    }
}

/// Immutable configuration governing redelivery of a failed step.
///
/// `maximum_redeliveries` of `None` means unlimited; `Some(0)` disables
/// redelivery entirely. Delay for attempt *n* (counted from 1) is
/// `min(max_delay, delay * multiplier^(n-1))`, optionally perturbed by
/// bounded random jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeliveryPolicy {
    /// Maximum redelivery attempts; `None` is unlimited.
    pub maximum_redeliveries: Option<u32>,
    /// Base delay before the first redelivery, in milliseconds.
    pub redelivery_delay_ms: u64,
    /// Multiplier applied per attempt for exponential backoff.
    pub backoff_multiplier: f64,
    /// Cap on any single computed delay, in milliseconds.
    pub maximum_redelivery_delay_ms: u64,
    /// Perturbs delays by up to ±15% to avoid synchronized retries.
    pub use_jitter: bool,
    /// Schedule redelivery via the executor instead of blocking the
    /// current step's thread.
    pub asynchronous_delayed: bool,
    /// Level for per-attempt logging.
    pub retry_attempted_log_level: RetryLogLevel,
    /// Level for logging when retries run out.
    pub retries_exhausted_log_level: RetryLogLevel,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            maximum_redeliveries: Some(0),
            redelivery_delay_ms: 1000,
            backoff_multiplier: 2.0,
            maximum_redelivery_delay_ms: 60_000,
            use_jitter: false,
            asynchronous_delayed: false,
            retry_attempted_log_level: RetryLogLevel::Debug,
            retries_exhausted_log_level: RetryLogLevel::Error,
        }
    }
}

impl RedeliveryPolicy {
    /// Creates a policy with the defaults (no redelivery).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum redelivery attempts.
    #[must_use]
    pub fn with_maximum_redeliveries(mut self, maximum: u32) -> Self {
        self.maximum_redeliveries = Some(maximum);
        self
    }

    /// Removes the redelivery limit.
    #[must_use]
    pub fn with_unlimited_redeliveries(mut self) -> Self {
        self.maximum_redeliveries = None;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_redelivery_delay_ms(mut self, delay: u64) -> Self {
        self.redelivery_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_maximum_redelivery_delay_ms(mut self, delay: u64) -> Self {
        self.maximum_redelivery_delay_ms = delay;
        self
    }

    /// Enables bounded random jitter.
    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.use_jitter = true;
        self
    }

    /// Schedules redeliveries via the executor instead of blocking.
    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.asynchronous_delayed = true;
        self
    }

    /// Sets the per-attempt log level.
    #[must_use]
    pub fn with_retry_attempted_log_level(mut self, level: RetryLogLevel) -> Self {
        self.retry_attempted_log_level = level;
        self
    }

    /// Sets the exhaustion log level.
    #[must_use]
    pub fn with_retries_exhausted_log_level(mut self, level: RetryLogLevel) -> Self {
        self.retries_exhausted_log_level = level;
        self
    }

    /// Validates the policy. Raised at configuration time, never while
    /// an exchange is being processed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(ConfigError::InvalidRedeliveryPolicy(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.maximum_redelivery_delay_ms < self.redelivery_delay_ms {
            return Err(ConfigError::InvalidRedeliveryPolicy(format!(
                "maximum delay {}ms is below base delay {}ms",
                self.maximum_redelivery_delay_ms, self.redelivery_delay_ms
            )));
        }
        Ok(())
    }

    /// Returns true if another redelivery is allowed after
    /// `redelivery_count` attempts so far.
    #[must_use]
    pub fn should_redeliver(&self, redelivery_count: u32) -> bool {
        self.maximum_redeliveries
            .map_or(true, |maximum| redelivery_count < maximum)
    }

    /// Computes the delay before attempt `attempt`, counted from 1.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.redelivery_delay_ms as f64;
        let cap = self.maximum_redelivery_delay_ms as f64;
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let mut delay = (base * self.backoff_multiplier.powi(exponent)).min(cap);

        if self.use_jitter && delay > 0.0 {
            let variance = rand::thread_rng().gen_range(-JITTER_FACTOR..=JITTER_FACTOR);
            delay = (delay * (1.0 + variance)).clamp(0.0, cap);
        }

        Duration::from_millis(delay.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_no_redelivery() {
        let policy = RedeliveryPolicy::default();
        assert_eq!(policy.maximum_redeliveries, Some(0));
        assert!(!policy.should_redeliver(0));
    }

    #[test]
    fn test_builder() {
        let policy = RedeliveryPolicy::new()
            .with_maximum_redeliveries(5)
            .with_redelivery_delay_ms(250)
            .with_backoff_multiplier(1.5)
            .with_maximum_redelivery_delay_ms(10_000)
            .with_jitter()
            .asynchronous();

        assert_eq!(policy.maximum_redeliveries, Some(5));
        assert_eq!(policy.redelivery_delay_ms, 250);
        assert!(policy.use_jitter);
        assert!(policy.asynchronous_delayed);
        policy.validate().expect("valid");
    }

    #[test]
    fn test_backoff_growth_with_cap() {
        let policy = RedeliveryPolicy::new()
            .with_redelivery_delay_ms(100)
            .with_backoff_multiplier(2.0)
            .with_maximum_redelivery_delay_ms(1000);

        let delays: Vec<u64> = (1..=5)
            .map(|attempt| u64::try_from(policy.delay_for_attempt(attempt).as_millis()).unwrap_or(0))
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000]);
    }

    #[test]
    fn test_unlimited_redeliveries() {
        let policy = RedeliveryPolicy::new().with_unlimited_redeliveries();
        assert!(policy.should_redeliver(u32::MAX - 1));
    }

    #[test]
    fn test_redelivery_bound() {
        let policy = RedeliveryPolicy::new().with_maximum_redeliveries(3);
        assert!(policy.should_redeliver(0));
        assert!(policy.should_redeliver(2));
        assert!(!policy.should_redeliver(3));
    }

    #[test]
    fn test_jitter_stays_bounded() {
        let policy = RedeliveryPolicy::new()
            .with_redelivery_delay_ms(100)
            .with_backoff_multiplier(1.0)
            .with_maximum_redelivery_delay_ms(1000)
            .with_jitter();

        for _ in 0..50 {
            let delay = policy.delay_for_attempt(1).as_millis();
            assert!((85..=115).contains(&delay), "delay {delay} out of bounds");
        }
    }

    #[test]
    fn test_validation_rejects_bad_multiplier() {
        let policy = RedeliveryPolicy::new().with_backoff_multiplier(0.5);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_cap_below_base() {
        let policy = RedeliveryPolicy::new()
            .with_redelivery_delay_ms(5000)
            .with_maximum_redelivery_delay_ms(1000);
        assert!(policy.validate().is_err());
    }
}
