//! Retry Logic and Error Resilience
//!
//! Retry policy with exponential backoff and jitter for transient failures
//! in MCP communication. Only idempotent operations (the initialize
//! handshake, catalog discovery) are retried; tool invocations are not,
//! since a handler may have side effects.

use std::time::Duration;

/// Retry configuration
///
/// # Example
///
/// ```ignore
/// let config = RetryConfig::default()
///     .max_attempts(5)
///     .base_delay(Duration::from_millis(50))
///     .max_delay(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: usize,

    /// Base delay before the first retry
    pub base_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Jitter factor (0.0 to 1.0) - random variation added to delays so
    /// concurrent sessions do not retry in lockstep
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the base delay between retries
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter factor (clamped to 0.0..=1.0)
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculate the delay for a given retry attempt
    ///
    /// Exponential backoff (`base_delay * 2^attempt`) with jitter, capped at
    /// `max_delay`.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let exponential_delay = self.base_delay * 2_u32.pow(attempt as u32);

        let jitter_range = exponential_delay.mul_f64(self.jitter);
        let jitter_offset = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range.as_secs_f64();
        let jittered_delay =
            exponential_delay.saturating_add(Duration::from_secs_f64(jitter_offset.abs()));

        jittered_delay.min(self.max_delay)
    }

    /// Check whether an error is transient and worth retrying
    ///
    /// Connection-level failures (refused, reset, EOF, timeout) retry.
    /// Anything that looks like a malformed message or a rejected request
    /// does not: resending the same bytes cannot fix it.
    pub fn should_retry_error(&self, error: &anyhow::Error) -> bool {
        let error_msg = error.to_string().to_lowercase();

        if error_msg.contains("unauthorized") || error_msg.contains("forbidden") {
            return false;
        }

        if error_msg.contains("invalid") && !error_msg.contains("timeout") {
            return false;
        }

        error_msg.contains("connection")
            || error_msg.contains("timeout")
            || error_msg.contains("timed out")
            || error_msg.contains("network")
            || error_msg.contains("eof")
            || error_msg.contains("broken pipe")
            || error_msg.contains("temporar")
    }
}
