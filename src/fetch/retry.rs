//! Bounded retry with exponential backoff and per-attempt timeouts.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::FetchError;
use crate::constants::{
    DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_BACKOFF_BASE_MS, DEFAULT_FETCH_ATTEMPTS,
};

/// Retry behaviour for a single logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Limit for each attempt. The in-flight request is dropped on expiry.
    pub attempt_timeout: Duration,
    /// Delay after the first failed attempt.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_FETCH_ATTEMPTS,
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn single(attempt_timeout: Duration) -> Self {
        Self {
            attempts: 1,
            attempt_timeout,
            backoff_base: Duration::ZERO,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

/// Run `op` until it succeeds or the policy's attempt bound is reached.
///
/// `op` receives the 1-based attempt number. Each attempt is wrapped in the
/// policy's timeout. Between attempts the delay doubles, and there is no delay
/// after the final attempt.
///
/// # Errors
///
/// Returns [`FetchError::Exhausted`] carrying the last attempt's error once
/// every attempt has failed.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, url: &str, mut op: F) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let outcome = match timeout(policy.attempt_timeout, op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                after: policy.attempt_timeout,
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(url = %url, attempt, error = %e, "Fetch attempt failed");
                last_error = Some(e);
            }
        }

        if attempt < attempts {
            sleep(policy.backoff_delay(attempt)).await;
        }
    }

    warn!(url = %url, attempts, "Giving up after final attempt");
    Err(FetchError::Exhausted {
        attempts,
        last: Box::new(last_error.unwrap_or(FetchError::Client(
            "retry loop made no attempts".to_string(),
        ))),
    })
}
