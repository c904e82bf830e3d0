//! Exponential Backoff Retry
//!
//! Re-runs a fallible async operation while its failures are classified as
//! retryable, sleeping with exponential backoff and jitter in between.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

/// Retry policy for a single operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total number of invocations this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retrying after the given (1-based) failed attempt.
    ///
    /// `min(base * 2^(attempt - 1) + jitter, max_delay)` where jitter is
    /// uniformly drawn from `[0, base / 10]`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let exponential = self.base_delay.saturating_mul(1u32 << exponent);
        let jitter = self
            .base_delay
            .mul_f64(rand::thread_rng().gen_range(0.0..=0.1));

        exponential.saturating_add(jitter).min(self.max_delay)
    }
}

/// Failure returned by [`retry_with_backoff`], tagged with why it stopped
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed with an error that must not be retried
    #[error("permanent failure on attempt {attempts}: {error}")]
    Permanent { attempts: u32, error: E },

    /// Every allowed attempt failed with a retryable error
    #[error("gave up after {attempts} attempts: {error}")]
    Exhausted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of times the operation was invoked
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The last error produced by the operation
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent { error, .. } | RetryError::Exhausted { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Execute an operation, retrying failures accepted by `should_retry`.
///
/// The operation receives the 1-based attempt number. Success on any attempt
/// returns immediately.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if !should_retry(&error) {
                    tracing::debug!(attempt, error = %error, "Permanent failure, not retrying");
                    return Err(RetryError::Permanent {
                        attempts: attempt,
                        error,
                    });
                }

                if attempt >= max_attempts {
                    tracing::error!(
                        attempt,
                        error = %error,
                        "Operation failed after all retries"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        error,
                    });
                }

                let delay = policy.backoff_delay(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying after delay"
                );

                sleep(delay).await;
            }
        }
    }
}
