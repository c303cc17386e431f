//! Step definitions: what a step does and what it leaves behind.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::engine::cancel::CancelToken;
use crate::engine::cleanup::CleanupAction;
use crate::engine::operation::{Operation, Probe};
use crate::engine::poll::{ConditionPoller, PollSpec};
use crate::engine::retry::RetryPolicy;
use crate::engine::waiter::{ResourceFetcher, ResourceStateWaiter};
use crate::error::FlowError;

/// Boxed future returned by [`StateWait::wait`].
pub type StateWaitFuture<'a> = Pin<Box<dyn Future<Output = Result<(), FlowError>> + Send + 'a>>;

/// A resource wait with its fetcher and target already bound.
///
/// Erases the resource's state type so waits on different kinds of resource
/// can sit in one step list.
pub trait StateWait: Send + Sync {
    /// Identity of the awaited resource and target, for logs.
    fn describe(&self) -> String;

    /// Run the wait once.
    fn wait<'a>(&'a self, cancel: &'a CancelToken) -> StateWaitFuture<'a>;
}

struct BoundWait<R: ResourceFetcher> {
    waiter: ResourceStateWaiter,
    fetcher: R,
    target: R::State,
}

impl<R> StateWait for BoundWait<R>
where
    R: ResourceFetcher + 'static,
{
    fn describe(&self) -> String {
        format!("{} to reach {}", self.fetcher.resource(), self.target)
    }

    fn wait<'a>(&'a self, cancel: &'a CancelToken) -> StateWaitFuture<'a> {
        Box::pin(
            self.waiter
                .wait_for_state(&self.fetcher, &self.target, cancel),
        )
    }
}

/// The work a step performs.
pub enum StepAction {
    /// A one-shot call.
    Invoke(Box<dyn Operation>),
    /// Completion is observed by polling a probe.
    Poll {
        /// The completion check.
        probe: Box<dyn Probe>,
        /// Cadence and deadline of the check.
        spec: PollSpec,
    },
    /// A one-shot call followed by a poll for its effect.
    ///
    /// Retry covers both halves, so a poll timeout repeats the call.
    InvokeThenPoll {
        /// The call.
        operation: Box<dyn Operation>,
        /// The completion check run after the call succeeded.
        probe: Box<dyn Probe>,
        /// Cadence and deadline of the check.
        spec: PollSpec,
    },
    /// A resource reaches a target state.
    AwaitState(Box<dyn StateWait>),
}

impl fmt::Debug for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invoke(_) => f.write_str("Invoke(..)"),
            Self::Poll { spec, .. } => f
                .debug_struct("Poll")
                .field("spec", spec)
                .finish_non_exhaustive(),
            Self::InvokeThenPoll { spec, .. } => f
                .debug_struct("InvokeThenPoll")
                .field("spec", spec)
                .finish_non_exhaustive(),
            Self::AwaitState(wait) => f
                .debug_tuple("AwaitState")
                .field(&wait.describe())
                .finish(),
        }
    }
}

/// When a step's teardown is registered with the cleanup guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupWhen {
    /// Only once the step has succeeded.
    #[default]
    OnSuccess,
    /// As soon as the step has been attempted, even if it failed.
    ///
    /// For actions that can leave a resource behind after partially
    /// succeeding.
    Attempted,
}

/// A named unit of a flow.
#[derive(Debug)]
pub struct Step {
    name: String,
    action: StepAction,
    retry: Option<RetryPolicy>,
    cleanup: Option<(CleanupAction, CleanupWhen)>,
}

impl Step {
    /// Create a step from an explicit action.
    #[must_use]
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            retry: None,
            cleanup: None,
        }
    }

    /// A step that calls `operation` once.
    #[must_use]
    pub fn invoke(name: impl Into<String>, operation: impl Operation + 'static) -> Self {
        Self::new(name, StepAction::Invoke(Box::new(operation)))
    }

    /// A step that polls `probe` until it reports completion.
    #[must_use]
    pub fn poll(name: impl Into<String>, spec: PollSpec, probe: impl Probe + 'static) -> Self {
        Self::new(
            name,
            StepAction::Poll {
                probe: Box::new(probe),
                spec,
            },
        )
    }

    /// A step that calls `operation` and then polls `probe` until the call
    /// has taken effect.
    #[must_use]
    pub fn invoke_then_poll(
        name: impl Into<String>,
        operation: impl Operation + 'static,
        spec: PollSpec,
        probe: impl Probe + 'static,
    ) -> Self {
        Self::new(
            name,
            StepAction::InvokeThenPoll {
                operation: Box::new(operation),
                probe: Box::new(probe),
                spec,
            },
        )
    }

    /// A step that waits for the resource behind `fetcher` to reach `target`.
    #[must_use]
    pub fn await_state<R>(
        name: impl Into<String>,
        waiter: ResourceStateWaiter,
        fetcher: R,
        target: R::State,
    ) -> Self
    where
        R: ResourceFetcher + 'static,
    {
        Self::new(
            name,
            StepAction::AwaitState(Box::new(BoundWait {
                waiter,
                fetcher,
                target,
            })),
        )
    }

    /// Run the whole action under `policy`.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Register a best-effort teardown once this step succeeds.
    #[must_use]
    pub fn with_cleanup(self, name: impl Into<String>, action: impl Operation + 'static) -> Self {
        self.with_cleanup_action(CleanupAction::new(name, action), CleanupWhen::OnSuccess)
    }

    /// Register a prepared teardown at the given point.
    #[must_use]
    pub fn with_cleanup_action(mut self, action: CleanupAction, when: CleanupWhen) -> Self {
        self.cleanup = Some((action, when));
        self
    }

    /// The step's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The retry policy, if one was set.
    #[must_use]
    pub const fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// The step's action.
    #[must_use]
    pub const fn action(&self) -> &StepAction {
        &self.action
    }

    pub(super) fn take_cleanup(&mut self) -> Option<(CleanupAction, CleanupWhen)> {
        self.cleanup.take()
    }

    /// Perform the action once.
    pub(super) async fn execute(&self, cancel: &CancelToken) -> Result<(), FlowError> {
        match &self.action {
            StepAction::Invoke(operation) => self.call(operation.as_ref(), cancel).await,
            StepAction::Poll { probe, spec } => {
                self.await_probe(probe.as_ref(), *spec, cancel).await
            }
            StepAction::InvokeThenPoll {
                operation,
                probe,
                spec,
            } => {
                self.call(operation.as_ref(), cancel).await?;
                self.await_probe(probe.as_ref(), *spec, cancel).await
            }
            StepAction::AwaitState(wait) => wait.wait(cancel).await,
        }
    }

    async fn call(&self, operation: &dyn Operation, cancel: &CancelToken) -> Result<(), FlowError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FlowError::cancelled(self.name.as_str())),
            result = operation.run() => result.map_err(FlowError::from),
        }
    }

    async fn await_probe(
        &self,
        probe: &dyn Probe,
        spec: PollSpec,
        cancel: &CancelToken,
    ) -> Result<(), FlowError> {
        ConditionPoller::new(spec)
            .poll(&self.name, cancel, || probe.check())
            .await
    }
}
