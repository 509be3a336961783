//! Retry Logic
//!
//! Exponential backoff with jitter. The strategy is stateless: the request
//! pipeline owns the per-request attempt counter and asks the strategy whether
//! and how long to wait.

use rand::Rng;
use std::time::Duration;

use crate::error::SharedoError;
use crate::types::{
    ClientConfig, DEFAULT_JITTER_RANGE, DEFAULT_MAX_RETRIES, DEFAULT_MAX_RETRY_DELAY,
    DEFAULT_RETRY_DELAY,
};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0).
    pub jitter_range: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_RETRY_DELAY,
            max_delay: DEFAULT_MAX_RETRY_DELAY,
            jitter_range: DEFAULT_JITTER_RANGE,
        }
    }
}

impl From<&ClientConfig> for RetryConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_delay,
            max_delay: config.max_retry_delay,
            jitter_range: config.jitter_range,
        }
    }
}

/// Backoff policy shared by every request of a client.
#[derive(Debug, Clone, Default)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    /// Create new retry strategy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Get configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the `attempt`-th retry (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.base_delay_for(attempt);
        let spread = capped * self.config.jitter_range;
        if !spread.is_finite() || spread <= 0.0 {
            return self.to_duration(capped);
        }
        let jitter = rand::thread_rng().gen_range(-spread..=spread);
        self.to_duration((capped + jitter).max(0.0))
    }

    /// Seconds that do not fit a `Duration` fall back to the maximum delay.
    fn to_duration(&self, secs: f64) -> Duration {
        Duration::try_from_secs_f64(secs).unwrap_or(self.config.max_delay)
    }

    /// Un-jittered delay in seconds.
    fn base_delay_for(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let raw = self.config.base_delay.as_secs_f64() * 2f64.powi(exponent);
        raw.min(self.config.max_delay.as_secs_f64())
    }

    /// Check whether a request that has already been retried `attempt` times
    /// should be retried after `error`.
    pub fn should_retry(&self, attempt: u32, error: &SharedoError) -> bool {
        attempt < self.config.max_retries && error.is_retryable()
    }

    /// Delay before the `attempt`-th retry after `error`, honouring any
    /// server-requested `Retry-After`.
    pub fn delay_for(&self, attempt: u32, error: &SharedoError) -> Duration {
        let backoff = self.delay(attempt);
        match error.retry_after() {
            Some(retry_after) => backoff.max(retry_after),
            None => backoff,
        }
    }
}

/// Create retry strategy.
pub fn create_retry_strategy(config: RetryConfig) -> RetryStrategy {
    RetryStrategy::new(config)
}
