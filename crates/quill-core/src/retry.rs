//! Retry policy and the standalone retry-with-backoff helper.
//!
//! Two policies are in use:
//! - the background writer: 3 attempts, fixed 300ms between attempts, retries
//!   every failure;
//! - read-path callers: 3 attempts, `100ms * attempt` between attempts, retries
//!   lock contention only.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{BoxError, Classify, RetryError};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed { delay_ms: u64 },
    /// `base * attempt` after the n-th failure.
    Linear { base_ms: u64 },
}

/// Retry policy: attempt ceiling plus delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total executions allowed, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Background writer policy: 3 attempts, fixed 300ms.
    pub fn writer_default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Fixed { delay_ms: 300 },
        }
    }

    /// Read-path policy: 3 attempts, 100ms, 200ms, ...
    pub fn lock_contention_default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Linear { base_ms: 100 },
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay to wait after the `attempt`-th failure (1-indexed).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Linear { base_ms } => {
                Duration::from_millis(base_ms.saturating_mul(u64::from(attempt.max(1))))
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::lock_contention_default()
    }
}

/// Run `op` until it succeeds, retrying only transient (busy/locked) failures.
///
/// - transient failure: sleep `policy.next_delay(attempt)` and try again;
/// - any other failure: returned at once as [`RetryError::Permanent`];
/// - ceiling reached: [`RetryError::MaxRetriesExceeded`] with the last
///   failure as its source.
///
/// A ceiling of 0 is treated as 1.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Into<BoxError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.classify().is_transient() {
            return Err(RetryError::Permanent(err.into()));
        }

        let source: BoxError = err.into();
        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %source, "store still busy, giving up");
            return Err(RetryError::MaxRetriesExceeded {
                attempts: attempt,
                source,
            });
        }

        let delay = policy.next_delay(attempt);
        debug!(attempt, ?delay, error = %source, "store busy, backing off");
        tokio::time::sleep(delay).await;
    }
}
