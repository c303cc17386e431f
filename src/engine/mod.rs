//! The orchestration engine.
//!
//! Leaves first:
//!
//! - [`ConditionPoller`] evaluates a probe on a fixed cadence until it holds,
//!   fails, or a deadline passes.
//! - [`RetryExecutor`] re-invokes a fallible operation a bounded number of
//!   times.
//! - [`ResourceStateWaiter`] waits for a resource to reach a target state.
//! - [`CleanupGuard`] tears down registered resources in reverse order.
//! - [`StepSequencer`] runs named steps in order and always cleans up.
//!
//! Every wait observes a [`CancelToken`], so a cancelled flow stops at the
//! next sleep or probe rather than running out its timeouts.

mod cancel;
mod cleanup;
mod operation;
mod poll;
mod retry;
mod sequencer;
mod waiter;

pub use cancel::{CancelHandle, CancelToken, cancellation};
pub use cleanup::{CleanupAction, CleanupFailure, CleanupGuard, CleanupSettings};
pub use operation::{Operation, OperationFuture, Probe, ProbeFuture};
pub use poll::{ConditionPoller, PollSpec};
pub use retry::{Backoff, RetryExecutor, RetryPolicy};
pub use sequencer::{
    CleanupWhen, FlowReport, FlowState, Handoff, StateWait, StateWaitFuture, Step, StepAction,
    StepRecord, StepSequencer, StepStatus,
};
pub use waiter::{ErrorClass, FetchFuture, ResourceFetcher, ResourceState, ResourceStateWaiter};
