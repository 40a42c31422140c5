//! Retry policy for handling transient failures with exponential backoff
//!
//! Each call is attempted at most `max_retries` times in total. Between
//! attempts the policy sleeps for a full-jitter delay drawn from
//! `[0, min(max_backoff, initial_backoff * multiplier^attempt)]`, or for the
//! server-mandated wait when the error carries one.

use crate::config::RetryConfig;
use crate::error::RetryableError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy with exponential backoff and full jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new RetryPolicy with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a RetryPolicy with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Execute an async operation with retry logic
    ///
    /// Non-retryable errors are returned immediately. Once the attempt budget
    /// is spent the last observed error is returned.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    attempt += 1;

                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if attempt >= max_attempts {
                        warn!(attempts = attempt, error = %err, "Max retries exhausted");
                        return Err(err);
                    }

                    let backoff = self.delay_for(&err, attempt - 1);
                    debug!(
                        attempt = attempt,
                        max_attempts = max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Total attempts per call
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.max(1)
    }

    /// Upper bound of the backoff before the given retry (0-based)
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let base = self.config.initial_backoff_ms as f64
            * self.config.backoff_multiplier.powi(attempt.min(63) as i32);
        let capped = base.min(self.config.max_backoff_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Calculate backoff duration for a given attempt number
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);

        if self.config.jitter && !ceiling.is_zero() {
            let millis = ceiling.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        } else {
            ceiling
        }
    }

    /// Delay before the next attempt, honoring a server-provided wait
    pub fn delay_for<E: RetryableError>(&self, err: &E, attempt: u32) -> Duration {
        err.retry_after()
            .unwrap_or_else(|| self.calculate_backoff(attempt))
    }

    /// Get the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
