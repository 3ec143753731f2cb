//! Retry wrapper with exponential backoff.
//!
//! # Policy
//!
//! - Attempts: `max_attempts` total, including the first.
//! - Delay before retry *n*: `initial_delay * backoff_factor * 2^(n-1)`, capped at
//!   `max_delay` (see [`RetryPolicy::delay_before`]).
//! - Each attempt is bounded by the policy's per-attempt timeout, if any. A timed
//!   out attempt counts as a retryable failure.
//! - Errors the caller marks non-retryable end the loop immediately.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use assay_types::{Backoff, RetryPolicy};

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptError<E> {
    Failed(E),
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(err) => err.fmt(f),
            Self::TimedOut(limit) => write!(f, "attempt timed out after {}s", limit.as_secs_f64()),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AttemptError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed(err) => Some(err),
            Self::TimedOut(_) => None,
        }
    }
}

/// Outcome of a retried operation.
///
/// A sum type so callers cannot mistake an exhausted retry for success.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success { value: T, attempts: u32 },
    Exhausted { attempts: u32, last: AttemptError<E> },
}

impl<T, E> RetryOutcome<T, E> {
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn into_result(self) -> Result<T, AttemptError<E>> {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::Exhausted { last, .. } => Err(last),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    backoff: &Backoff,
    mut op: F,
    retryable: R,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match policy.attempt_timeout() {
            Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                Ok(result) => result.map_err(AttemptError::Failed),
                Err(_) => Err(AttemptError::TimedOut(limit)),
            },
            None => op(attempt).await.map_err(AttemptError::Failed),
        };

        let error = match result {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                };
            }
            Err(error) => error,
        };

        let can_retry = match &error {
            AttemptError::Failed(inner) => retryable(inner),
            AttemptError::TimedOut(_) => true,
        };
        if !can_retry || attempt >= max_attempts {
            return RetryOutcome::Exhausted {
                attempts: attempt,
                last: error,
            };
        }

        let delay = policy.delay_before(attempt, backoff);
        tracing::debug!(
            error = %error,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis(),
            "Retrying after failed attempt"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
