//! Bounded retry with cancellable backoff.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::error::{Error, ErrorKind, RawError, Result, RetryError};

type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// How often and how patiently to retry.
///
/// The default policy makes 3 attempts, waits 50ms between them, and retries
/// only deadlocks and timeouts.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. 1 disables retrying.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub delay: Duration,
    /// Factor applied to the wait after each further attempt. 1.0 keeps it fixed.
    pub multiplier: f64,
    /// Upper bound for the wait once multiplied.
    pub max_delay: Option<Duration>,
    retry_if: RetryPredicate,
}

/// Retry deadlocks and timeouts.
pub fn is_transient(err: &Error) -> bool {
    matches!(err.kind(), ErrorKind::Deadlock | ErrorKind::Timeout)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(50))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .field("multiplier", &self.multiplier)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            multiplier: 1.0,
            max_delay: None,
            retry_if: Arc::new(is_transient),
        }
    }

    /// Replace the retry predicate.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Arc::new(predicate);
        self
    }

    /// Grow the wait geometrically, optionally capped.
    pub fn with_backoff(mut self, multiplier: f64, max_delay: Option<Duration>) -> Self {
        self.multiplier = multiplier;
        self.max_delay = max_delay;
        self
    }

    pub fn should_retry(&self, err: &Error) -> bool {
        (self.retry_if)(err)
    }

    /// Wait before attempt `attempt + 1`, where `attempt` counts from 1.
    #[allow(clippy::cast_possible_truncation)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = if self.multiplier.is_finite() && self.multiplier > 0.0 {
            self.multiplier.powi(exponent)
        } else {
            1.0
        };
        let nanos = (self.delay.as_nanos() as f64 * factor).round();
        let wait = if nanos.is_finite() && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            Duration::MAX
        };
        match self.max_delay {
            Some(cap) => wait.min(cap),
            None => wait,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or runs out of attempts.
///
/// Waits between attempts end early if `ctx` ends; the context error is then
/// returned classified as [`ErrorKind::Timeout`]. Exhausting every attempt yields
/// [`Error::Retry`] carrying the attempt count and the last error.
pub fn with_retry<T, F>(ctx: &Context, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    policy.validate()?;

    let mut attempt = 1;
    loop {
        let err = match op() {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !policy.should_retry(&err) {
            tracing::debug!(attempt, error = %err, "Non-retryable error");
            return Err(err);
        }
        if attempt >= policy.max_attempts {
            tracing::warn!(attempts = attempt, error = %err, "Retries exhausted");
            return Err(Error::Retry(RetryError {
                attempts: attempt,
                last: Box::new(err),
            }));
        }

        let wait = policy.delay_for(attempt);
        tracing::debug!(attempt, wait = ?wait, error = %err, "Retrying");
        if let Err(cause) = ctx.sleep(wait) {
            tracing::debug!(attempt, last = %err, "Retry wait interrupted by context");
            return Err(Error::classified(ErrorKind::Timeout, RawError::Context(cause)));
        }
        attempt += 1;
    }
}
