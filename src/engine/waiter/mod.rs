//! Waiting for an external resource to reach a named state.
//!
//! [`ResourceStateWaiter`] is a thin layer over [`ConditionPoller`]: each tick
//! fetches the resource once and compares the observed state with the target.
//! How fetch errors are treated is decided by the [`ResourceFetcher`], because
//! the right answer differs per resource kind.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use super::cancel::CancelToken;
use super::poll::{ConditionPoller, PollSpec};
use crate::error::{FlowError, OperationError, WaitError};

/// Boxed future returned by [`ResourceFetcher::fetch`].
pub type FetchFuture<'a, S> = Pin<Box<dyn Future<Output = Result<S, OperationError>> + Send + 'a>>;

/// A resource-kind specific state enum.
///
/// States are compared for equality only; no ordering or monotonicity is
/// assumed.
pub trait ResourceState: Clone + PartialEq + fmt::Debug + fmt::Display + Send + Sync {}

impl<T> ResourceState for T where T: Clone + PartialEq + fmt::Debug + fmt::Display + Send + Sync {}

/// How a fetch error affects an ongoing wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Treat as "not there yet" and keep polling.
    Retryable,
    /// Abort the wait with this error.
    Terminal,
}

/// Fetches the current state of one named resource.
pub trait ResourceFetcher: Send + Sync {
    /// The state type of this resource kind.
    type State: ResourceState;

    /// Human-readable identity used in logs and errors.
    fn resource(&self) -> String;

    /// Read the current state once.
    fn fetch(&self) -> FetchFuture<'_, Self::State>;

    /// Decide whether a fetch error ends the wait.
    ///
    /// By convention a resource that does not exist yet, or a transient
    /// transport failure, is retryable; anything else is terminal.
    fn classify(&self, error: &OperationError) -> ErrorClass {
        match error {
            OperationError::NotFound { .. } | OperationError::Transient { .. } => {
                ErrorClass::Retryable
            }
            OperationError::Unauthorized { .. }
            | OperationError::Malformed { .. }
            | OperationError::Terminal { .. } => ErrorClass::Terminal,
        }
    }
}

/// Polls a [`ResourceFetcher`] until the resource reaches a target state.
#[derive(Debug, Clone, Copy)]
pub struct ResourceStateWaiter {
    poller: ConditionPoller,
}

impl ResourceStateWaiter {
    /// Create a waiter polling with the given specification.
    #[must_use]
    pub const fn new(spec: PollSpec) -> Self {
        Self {
            poller: ConditionPoller::new(spec),
        }
    }

    /// The polling specification in use.
    #[must_use]
    pub const fn spec(&self) -> PollSpec {
        self.poller.spec()
    }

    /// Wait until `fetcher` reports `target`.
    ///
    /// Each poll tick performs exactly one fetch. Only observed states are
    /// reported; intermediate states between two ticks are never inferred.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when the fetcher classifies it as terminal,
    /// `WaitError::Timeout` (naming the last observed state) when the deadline
    /// passes, and `WaitError::Cancelled` when `cancel` fires.
    pub async fn wait_for_state<R>(
        &self,
        fetcher: &R,
        target: &R::State,
        cancel: &CancelToken,
    ) -> Result<(), FlowError>
    where
        R: ResourceFetcher + ?Sized,
    {
        let resource = fetcher.resource();
        let description = format!("{resource} to reach {target}");
        let last_seen: Mutex<Option<R::State>> = Mutex::new(None);
        let last_seen_ref = &last_seen;
        let resource_ref = resource.as_str();

        let result = self
            .poller
            .poll(&description, cancel, move || async move {
                match fetcher.fetch().await {
                    Ok(state) => {
                        let mut last = last_seen_ref
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                        if last.as_ref() != Some(&state) {
                            info!(resource = resource_ref, state = %state, "observed state");
                        }
                        let done = state == *target;
                        *last = Some(state);
                        Ok::<bool, FlowError>(done)
                    }
                    Err(error) => match fetcher.classify(&error) {
                        ErrorClass::Retryable => {
                            debug!(resource = resource_ref, error = %error, "fetch not ready yet");
                            Ok(false)
                        }
                        ErrorClass::Terminal => Err(FlowError::from(error)),
                    },
                }
            })
            .await;

        result.map_err(|error| match error {
            FlowError::Wait(WaitError::Timeout { timeout, .. }) => {
                let observed = last_seen
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_ref()
                    .map_or_else(|| String::from("nothing"), ToString::to_string);
                FlowError::timeout(format!("{description} (last observed: {observed})"), timeout)
            }
            other => other,
        })
    }
}
