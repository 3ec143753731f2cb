//! Retry policy shared by every compiled step.
//!
//! The policy is declared once per manifest under `execution.retry_policy` and
//! materialised onto each step. The wall-clock schedule between attempts is not
//! part of the manifest: it comes from a [`Backoff`] supplied by whoever runs
//! the plan.

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Accepted values for `execution.retry_policy.max_attempts`.
pub const MAX_ATTEMPTS_RANGE: RangeInclusive<u32> = 1..=10;

/// Accepted values for `execution.retry_policy.backoff_factor`.
pub const BACKOFF_FACTOR_RANGE: RangeInclusive<f64> = 0.1..=10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff_factor: f64,
    /// Per-attempt timeout in seconds.
    #[serde(rename = "timeout")]
    pub timeout_secs: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_factor: 1.0,
            timeout_secs: None,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Delay to wait before retry number `retry` (1 before the second attempt).
    ///
    /// `initial_delay * backoff_factor * 2^(retry - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_before(&self, retry: u32, backoff: &Backoff) -> Duration {
        let exponent = retry.saturating_sub(1).min(30).cast_signed();
        let base = backoff.initial_delay.as_secs_f64() * self.backoff_factor * 2.0_f64.powi(exponent);
        let capped = base.min(backoff.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }
}

/// Wall-clock schedule used between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// No waiting between attempts.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}
