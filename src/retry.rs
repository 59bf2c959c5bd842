//! Retry with exponential backoff for transient failures.
//!
//! [`with_retry`] is generic over the operation's result and error types;
//! errors opt in through [`Retryable`], which tells the loop whether a
//! failure is worth another attempt and how to report cancellation and
//! exhaustion.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::controller::ControllerError;

/// Attempts made when none are configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Delay before the first retry when none is configured.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
/// Upper bound for a single backoff delay when none is configured.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Errors that can be fed through [`with_retry`].
pub trait Retryable: Sized {
    /// Returns `true` when another attempt may succeed.
    fn is_transient(&self) -> bool;

    /// Error returned when cancellation interrupts a backoff sleep.
    fn cancelled() -> Self;

    /// Error returned once every attempt failed transiently.
    fn exhausted(attempts: u32, last: Self) -> Self;
}

impl Retryable for ControllerError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }

    fn cancelled() -> Self {
        Self::Cancelled
    }

    fn exhausted(attempts: u32, last: Self) -> Self {
        Self::RetriesExhausted {
            attempts,
            source: Box::new(last),
        }
    }
}

/// Backoff parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap applied to every delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Returns the sleeps taken between attempts, in order.
    ///
    /// The schedule has `max_attempts - 1` entries: delays double from
    /// `initial_delay` and never exceed `max_delay`.
    #[must_use]
    pub fn delays(&self) -> Backoff {
        Backoff {
            next: self.initial_delay.min(self.max_delay),
            max: self.max_delay,
            remaining: self.max_attempts.max(1).saturating_sub(1),
        }
    }
}

/// Iterator over backoff delays produced by [`RetryPolicy::delays`].
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    remaining: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next;
        self.next = current.checked_mul(2).unwrap_or(self.max).min(self.max);
        Some(current)
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the policy's
/// attempts are spent.
///
/// Non-transient errors are returned as-is after the attempt that produced
/// them. Cancellation during a backoff sleep returns [`Retryable::cancelled`]
/// rather than the last operation error.
///
/// # Errors
///
/// Returns the first non-transient error, the cancellation error, or
/// [`Retryable::exhausted`] wrapping the final transient error.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delays = policy.delays();
    let mut attempt: u32 = 1;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => err,
        };
        let Some(delay) = delays.next() else {
            return Err(E::exhausted(attempt, err));
        };
        warn!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient failure; retrying"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(E::cancelled()),
            () = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
