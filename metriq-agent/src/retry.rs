//! Retry utilities for batch delivery.
//!
//! The wait before retry `n` (0-based) is `start_interval + n * step`, so the
//! default policy sleeps 1s, 3s and 5s between its four attempts.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Errors that can be retried.
pub trait RetryableError {
    /// Whether this error should be retried after a backoff.
    fn is_retryable(&self) -> bool;
}

/// Linear backoff policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub start_interval: Duration,
    /// Added to the wait after every retry.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            start_interval: Duration::from_secs(1),
            step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.start_interval
            .saturating_add(self.step.saturating_mul(retry))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run an async operation, retrying retryable errors per `policy`.
pub async fn run_with_retry<F, Fut, T, E>(phase: &str, policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut retry = 0;

    loop {
        let attempt = retry + 1;
        debug!(phase, attempt, max_attempts, "Starting attempt");

        match op().await {
            Ok(value) => {
                if retry > 0 {
                    info!(phase, attempt, "Attempt succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && retry < policy.max_retries => {
                let delay = policy.delay(retry);
                warn!(
                    phase,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed (retryable), backing off"
                );
                sleep(delay).await;
                retry += 1;
            }
            Err(err) => {
                warn!(
                    phase,
                    attempt,
                    retryable = err.is_retryable(),
                    error = %err,
                    "Attempt failed, giving up"
                );
                return Err(err);
            }
        }
    }
}
