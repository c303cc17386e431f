//! Bounded retry of fallible one-shot operations.
//!
//! The executor re-invokes an operation up to `max_attempts` times without
//! interpreting why it failed. It exists for flake tolerance (for example
//! re-applying a manifest after a webhook hiccup), not for riding out
//! sustained outages, so the default is an immediate retry.

use std::fmt;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::cancel::CancelToken;
use crate::error::{ConfigError, FlowError};

/// Delay schedule between two attempts.
#[derive(Clone, Default)]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,
    /// Wait the same duration before every retry.
    Fixed(Duration),
    /// Compute the delay from the number of failed attempts so far.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl Backoff {
    /// Build a [`Backoff::Custom`] schedule.
    #[must_use]
    pub fn custom(schedule: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(schedule))
    }

    /// Delay to observe after `failed_attempts` consecutive failures.
    #[must_use]
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => *delay,
            Self::Custom(schedule) => schedule(failed_attempts),
        }
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// How many times an operation may run and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` invocations with no backoff.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when `max_attempts` is zero.
    pub fn new(max_attempts: u32) -> Result<Self, ConfigError> {
        let attempts = NonZeroU32::new(max_attempts).ok_or_else(|| ConfigError::InvalidValue {
            field: String::from("max_attempts"),
            reason: String::from("must be at least 1"),
        })?;
        Ok(Self::attempts(attempts))
    }

    /// Create a policy from an already validated attempt count.
    #[must_use]
    pub const fn attempts(max_attempts: NonZeroU32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
        }
    }

    /// A policy that runs the operation exactly once.
    #[must_use]
    pub const fn once() -> Self {
        Self::attempts(NonZeroU32::MIN)
    }

    /// Replace the backoff schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Maximum number of invocations.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts.get()
    }

    /// The backoff schedule.
    #[must_use]
    pub const fn backoff(&self) -> &Backoff {
        &self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

/// Runs an operation under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create an executor for the given policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Invoke `op` until it succeeds or the attempt budget is spent.
    ///
    /// Cancellation is the only failure the executor looks at: a cancelled
    /// attempt is returned at once, and backoff waits end when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error once `max_attempts` invocations have
    /// failed, or `WaitError::Cancelled` if the flow was cancelled.
    pub async fn run<T, F, Fut, E>(
        &self,
        operation: &str,
        cancel: &CancelToken,
        mut op: F,
    ) -> Result<T, FlowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<FlowError>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(FlowError::cancelled(operation));
            }
            attempt = attempt.saturating_add(1);

            let error: FlowError = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error.into(),
            };

            if error.is_cancelled() {
                return Err(error);
            }
            if attempt >= max_attempts {
                warn!(operation, attempt, error = %error, "retry budget exhausted");
                return Err(error);
            }

            let delay = self.policy.backoff().delay(attempt);
            warn!(
                operation,
                attempt,
                max_attempts,
                delay = ?delay,
                error = %error,
                "attempt failed, retrying"
            );
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(FlowError::cancelled(operation)),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
