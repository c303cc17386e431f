//! Condition polling with a fixed cadence and a hard deadline.
//!
//! The poller invokes a probe immediately and then every `interval` until the
//! probe reports completion, the probe returns an error, the timeout elapses,
//! or the flow is cancelled. Classification of probe errors is the caller's
//! job: a probe that wants to tolerate an error swallows it and returns
//! `Ok(false)`.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, warn};

use super::cancel::CancelToken;
use crate::error::{ConfigError, FlowError};

/// Cadence and deadline of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    interval: Duration,
    timeout: Duration,
}

impl PollSpec {
    /// Create a polling specification.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when `interval` is zero or when
    /// `timeout` is shorter than `interval`, since the probe would never get a
    /// second chance to run.
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: String::from("interval"),
                reason: String::from("must be greater than zero"),
            });
        }
        if timeout < interval {
            return Err(ConfigError::InvalidValue {
                field: String::from("timeout"),
                reason: format!("{timeout:?} is shorter than the poll interval {interval:?}"),
            });
        }
        Ok(Self { interval, timeout })
    }

    /// Create a polling specification from whole seconds.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::new`].
    pub fn from_secs(interval_secs: u64, timeout_secs: u64) -> Result<Self, ConfigError> {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(timeout_secs),
        )
    }

    /// Delay between two probe invocations.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Time after which the poll gives up.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Repeatedly evaluates a probe until it holds, fails, or times out.
#[derive(Debug, Clone, Copy)]
pub struct ConditionPoller {
    spec: PollSpec,
}

impl ConditionPoller {
    /// Create a poller for the given specification.
    #[must_use]
    pub const fn new(spec: PollSpec) -> Self {
        Self { spec }
    }

    /// The specification this poller runs with.
    #[must_use]
    pub const fn spec(&self) -> PollSpec {
        self.spec
    }

    /// Poll `probe` until it reports `true`.
    ///
    /// The probe runs immediately and then at `start + k * interval`. The last
    /// sleep is clamped to the deadline and one final probe runs there, so a
    /// probe that never completes times out no earlier than `timeout` and no
    /// later than `timeout + interval`. A single probe invocation still
    /// pending at `timeout + interval` is abandoned.
    ///
    /// # Errors
    ///
    /// Returns the probe's error unchanged, `WaitError::Timeout` when the
    /// deadline passes, and `WaitError::Cancelled` when `cancel` fires.
    pub async fn poll<F, Fut, E>(
        &self,
        operation: &str,
        cancel: &CancelToken,
        mut probe: F,
    ) -> Result<(), FlowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: Into<FlowError>,
    {
        let start = Instant::now();
        let deadline = start + self.spec.timeout;
        let hard_deadline = deadline + self.spec.interval;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(FlowError::cancelled(operation));
            }
            attempt = attempt.saturating_add(1);

            let done = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FlowError::cancelled(operation)),
                outcome = timeout_at(hard_deadline, probe()) => match outcome {
                    Ok(result) => result.map_err(Into::<FlowError>::into)?,
                    Err(_) => return Err(self.timed_out(operation, attempt)),
                },
            };
            debug!(operation, attempt, done, "probe evaluated");
            if done {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(self.timed_out(operation, attempt));
            }

            let next_tick = start + self.spec.interval.saturating_mul(attempt);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FlowError::cancelled(operation)),
                () = sleep_until(next_tick.min(deadline)) => {}
            }
        }
    }

    fn timed_out(&self, operation: &str, attempts: u32) -> FlowError {
        warn!(
            operation,
            attempts,
            timeout = ?self.spec.timeout,
            "condition did not hold before the deadline"
        );
        FlowError::timeout(operation, self.spec.timeout)
    }
}

#[cfg(test)]
mod tests;
