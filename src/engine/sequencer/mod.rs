//! Strictly sequential execution of named steps.
//!
//! The sequencer runs steps one after another. The first step that fails
//! after its retry budget aborts the flow: the remaining steps are skipped and
//! the flow moves straight to cleanup. Cleanup always runs, whatever the
//! verdict, and its failures are reported alongside the verdict without
//! changing it.
//!
//! State machines:
//!
//! - flow: `InProgress -> Completed | Aborted`
//! - step: `Pending -> Running -> Succeeded | Failed`, or `Skipped` when the
//!   flow aborted before reaching it

mod handoff;
mod step;

use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info};

use super::cancel::CancelToken;
use super::cleanup::{CleanupAction, CleanupFailure, CleanupGuard, CleanupSettings};
use super::retry::RetryExecutor;
use crate::error::FlowError;

pub use handoff::Handoff;
pub use step::{CleanupWhen, StateWait, StateWaitFuture, Step, StepAction};

/// Lifecycle state of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Not started yet.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Failed after exhausting its retry budget, or was cancelled.
    Failed,
    /// Never reached because an earlier step failed.
    Skipped,
}

/// Lifecycle state of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Steps are still executing.
    InProgress,
    /// Every step succeeded.
    Completed,
    /// A step failed and the remaining steps were skipped.
    Aborted,
}

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    /// The step's name.
    pub name: String,
    /// Final status.
    pub status: StepStatus,
    /// Number of times the action was invoked.
    pub attempts: u32,
    /// Wall time spent in the step, including retries.
    pub elapsed: Duration,
}

impl StepRecord {
    fn pending(name: &str) -> Self {
        Self {
            name: String::from(name),
            status: StepStatus::Pending,
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// Verdict of a finished flow.
#[derive(Debug)]
pub struct FlowReport {
    /// `Ok` when every step succeeded, otherwise the failing step's error.
    pub outcome: Result<(), FlowError>,
    /// Teardown failures, in the order the actions ran.
    pub cleanup_failures: Vec<CleanupFailure>,
    /// One record per step, in step order.
    pub steps: Vec<StepRecord>,
    /// Final flow state.
    pub state: FlowState,
}

impl FlowReport {
    /// Returns whether every step succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Split the report into the verdict and the cleanup failures.
    #[must_use]
    pub fn into_result(self) -> (Result<(), FlowError>, Vec<CleanupFailure>) {
        (self.outcome, self.cleanup_failures)
    }

    /// Look up a step's record by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|record| record.name == name)
    }
}

/// Runs a list of steps in order, then cleans up.
#[derive(Debug)]
pub struct StepSequencer {
    flow: String,
    steps: Vec<Step>,
    guard: CleanupGuard,
}

impl StepSequencer {
    /// Create an empty sequencer for the named flow.
    #[must_use]
    pub fn new(flow: impl Into<String>, cleanup: CleanupSettings) -> Self {
        Self {
            flow: flow.into(),
            steps: Vec::new(),
            guard: CleanupGuard::new(cleanup),
        }
    }

    /// Append a step.
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Register a teardown action before any step runs.
    ///
    /// It runs after the cleanup of every step, whatever the verdict.
    #[must_use]
    pub fn teardown(mut self, action: CleanupAction) -> Self {
        self.guard.register_action(action);
        self
    }

    /// Append several steps.
    #[must_use]
    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Run every step, then every registered cleanup action.
    pub async fn run(self, cancel: &CancelToken) -> FlowReport {
        let Self {
            flow,
            steps,
            mut guard,
        } = self;
        let mut records: Vec<StepRecord> = steps
            .iter()
            .map(|step| StepRecord::pending(step.name()))
            .collect();
        let mut outcome: Result<(), FlowError> = Ok(());
        info!(flow = %flow, steps = steps.len(), "flow started");

        for (mut step, record) in steps.into_iter().zip(records.iter_mut()) {
            if outcome.is_err() {
                record.status = StepStatus::Skipped;
                continue;
            }
            if let Err(failure) = run_step(&flow, &mut step, record, &mut guard, cancel).await {
                outcome = Err(FlowError::StepFailed {
                    step: String::from(step.name()),
                    source: Box::new(failure),
                });
            }
        }

        let state = if outcome.is_ok() {
            FlowState::Completed
        } else {
            FlowState::Aborted
        };
        let cleanup_failures = guard.run_all().await;

        match &outcome {
            Ok(()) => info!(
                flow = %flow,
                cleanup_failures = cleanup_failures.len(),
                "flow completed"
            ),
            Err(failure) => error!(
                flow = %flow,
                error = %failure,
                cleanup_failures = cleanup_failures.len(),
                "flow aborted"
            ),
        }

        FlowReport {
            outcome,
            cleanup_failures,
            steps: records,
            state,
        }
    }
}

async fn run_step(
    flow: &str,
    step: &mut Step,
    record: &mut StepRecord,
    guard: &mut CleanupGuard,
    cancel: &CancelToken,
) -> Result<(), FlowError> {
    if cancel.is_cancelled() {
        record.status = StepStatus::Failed;
        error!(flow, step = step.name(), "flow cancelled before step");
        return Err(FlowError::cancelled(step.name()));
    }

    record.status = StepStatus::Running;
    info!(flow, step = step.name(), "step started");
    let started = Instant::now();
    let executor = RetryExecutor::new(step.retry().cloned().unwrap_or_default());
    let mut attempts: u32 = 0;
    let result = {
        let current: &Step = step;
        executor
            .run(current.name(), cancel, || {
                attempts = attempts.saturating_add(1);
                current.execute(cancel)
            })
            .await
    };
    record.attempts = attempts;
    record.elapsed = started.elapsed();

    let cleanup = step.take_cleanup();
    match result {
        Ok(()) => {
            record.status = StepStatus::Succeeded;
            info!(
                flow,
                step = step.name(),
                attempts,
                elapsed = ?record.elapsed,
                "step succeeded"
            );
            if let Some((action, _)) = cleanup {
                guard.register_action(action);
            }
            Ok(())
        }
        Err(failure) => {
            record.status = StepStatus::Failed;
            error!(flow, step = step.name(), attempts, error = %failure, "step failed");
            if let Some((action, CleanupWhen::Attempted)) = cleanup {
                guard.register_action(action);
            }
            Err(failure)
        }
    }
}
