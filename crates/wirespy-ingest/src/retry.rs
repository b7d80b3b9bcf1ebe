//! Bounded retry with exponential backoff for store writes.
//!
//! ```text
//! Attempt 1: immediate
//! Attempt 2: wait initial_backoff
//! Attempt 3: wait initial_backoff * multiplier
//! ...        capped at max_backoff, at most max_retries retries
//! ```
//!
//! Every attempt is bounded by a deadline; an attempt that overruns it fails
//! with [`Error::StoreTimeout`], which is retryable. Errors for which
//! [`Error::is_retryable`] is false end the loop immediately.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Retry policy for store writes.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: usize,

    /// Backoff before the first retry.
    pub initial_backoff: Duration,

    /// Upper bound for any single backoff.
    pub max_backoff: Duration,

    /// Growth factor between consecutive backoffs.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Backoff before retry number `attempt` (0-indexed).
    ///
    /// `min(initial_backoff * multiplier^attempt, max_backoff)`
    pub fn backoff(&self, attempt: usize) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(backoff_ms as u64).min(self.max_backoff)
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out.
///
/// Returns the last error when giving up. `on_retry` is called once per
/// retry so callers can count them.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    deadline: Duration,
    mut on_retry: impl FnMut(&Error),
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        let outcome = match timeout(deadline, operation()).await {
            Ok(result) => result,
            Err(_) => Err(Error::StoreTimeout(deadline)),
        };

        match outcome {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "Store write succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                warn!(error = %e, "Non-retryable store error, giving up");
                return Err(e);
            }
            Err(e) if attempt >= policy.max_retries => {
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    error = %e,
                    "Max retries exhausted, giving up"
                );
                return Err(e);
            }
            Err(e) => {
                let backoff = policy.backoff(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retryable store error, backing off"
                );
                on_retry(&e);
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
