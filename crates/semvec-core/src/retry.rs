//! Retry logic with exponential backoff
//!
//! Only failures classified by [`crate::SemvecError::is_transient`] are retried.

use crate::config::RetryConfig;
use crate::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy for handling transient store failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.base_delay_ms))
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Run `operation`, retrying transient failures
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;

        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempts < self.max_retries => {
                    attempts += 1;
                    let delay = self.delay_for(attempts);

                    tracing::warn!(
                        operation,
                        attempt = attempts,
                        max_retries = self.max_retries,
                        ?delay,
                        error = %e,
                        "Transient store failure, retrying"
                    );

                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
