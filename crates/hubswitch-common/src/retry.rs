//! Retry utilities with exponential backoff and jitter.
//!
//! Retrying is opt-in per call: the caller passes a [`RetryPolicy`] and a
//! classifier deciding which errors are worth another attempt. Errors the
//! classifier rejects are returned after the first attempt.
//!
//! # Example
//!
//! ```ignore
//! use hubswitch_common::retry::{retry_with_backoff, RetryPolicy};
//!
//! let result = retry_with_backoff(
//!     &RetryPolicy::default(),
//!     "list managedclusters",
//!     |e: &CallError| e.is_retryable(),
//!     || async { transport.list(&ar, None).await },
//! ).await;
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Backoff policy for calls that may fail transiently.
///
/// Attempts are always bounded; a policy with `max_attempts == 1` disables
/// retrying entirely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self::with_max_attempts(1)
    }

    /// Delay before the retry following `attempt` (1-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        self.initial_delay.mul_f64(factor)
    }

    /// Delay after applying a jitter factor, never above `max_delay`
    pub fn jittered_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let secs = self.base_delay(attempt).as_secs_f64() * jitter.max(0.0);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Why a retried operation gave up
#[derive(Debug, PartialEq)]
pub struct RetryFailure<E> {
    /// The last error observed
    pub error: E,
    /// Number of attempts made
    pub attempts: u32,
    /// `true` when the retry budget ran out, `false` when the error was not retryable
    pub exhausted: bool,
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Retries while `should_retry` accepts the error and attempts remain.
///
/// # Arguments
/// * `policy` - Retry policy
/// * `operation_name` - Name for logging purposes
/// * `should_retry` - Classifier for errors worth another attempt
/// * `operation` - The async operation to retry
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    operation_name: &str,
    should_retry: C,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => {
                return Err(RetryFailure {
                    error: e,
                    attempts: attempt,
                    exhausted: false,
                });
            }
            Err(e) => {
                if attempt >= max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(RetryFailure {
                        error: e,
                        attempts: attempt,
                        exhausted: true,
                    });
                }

                // Add jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = policy.jittered_delay(attempt, jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;
            }
        }
    }
}
