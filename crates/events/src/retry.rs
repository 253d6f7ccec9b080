//! Bounded retry with linear backoff for stream-store connectivity errors.
//!
//! Only [`StreamError::is_transient`] failures are retried; anything else is
//! returned on the first occurrence.

use std::future::Future;
use std::time::Duration;

use crate::error::StreamError;

/// Default number of attempts (including the first) before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default backoff step. The n-th retry waits `n * step`.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(200);

/// How many times to try a store operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl RetryPolicy {
    pub const fn linear(max_attempts: u32, backoff_step: Duration) -> Self {
        Self {
            max_attempts,
            backoff_step,
        }
    }

    /// Delay before the attempt that follows failed attempt number `attempt`
    /// (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF_STEP)
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy is exhausted.
///
/// On exhaustion the last transient error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, StreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StreamError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Stream store unreachable, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(operation, attempts = attempt, error = %e, "Stream store retries exhausted");
                }
                return Err(e);
            }
        }
    }
}
