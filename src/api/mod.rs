//! Library entry points for running flows.
//!
//! [`run_flow`] drives a [`FlowSpec`] to completion and returns a
//! [`FlowReport`] holding the verdict, per-step records and any cleanup
//! failures. It never prints and never exits the process; presenting the
//! report is the embedder's job.
//!
//! [`upgrade`] assembles the operator and Ironic upgrade procedure from
//! configuration and a cluster collaborator.

pub mod upgrade;

use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;
use crate::engine::{CancelToken, CleanupAction, CleanupSettings, Step, StepSequencer};

pub use crate::engine::{FlowReport, FlowState, StepRecord, StepStatus};

/// A named, ordered list of steps plus its run-wide settings.
#[derive(Debug)]
pub struct FlowSpec {
    /// Flow name used in logs.
    pub name: String,
    /// Steps in execution order.
    pub steps: Vec<Step>,
    /// Teardown registered before the first step, so it runs after every
    /// step's own cleanup.
    pub teardown: Vec<CleanupAction>,
    /// Cleanup guard settings.
    pub cleanup: CleanupSettings,
    /// Cancel the flow once this much time has passed.
    pub deadline: Option<Duration>,
}

impl FlowSpec {
    /// Create an empty flow with default settings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            teardown: Vec::new(),
            cleanup: CleanupSettings::default(),
            deadline: None,
        }
    }

    /// Create an empty flow taking cleanup settings and deadline from `config`.
    #[must_use]
    pub fn from_config(name: impl Into<String>, config: &AppConfig) -> Self {
        Self {
            cleanup: config.cleanup_settings(),
            deadline: config.flow_deadline(),
            ..Self::new(name)
        }
    }

    /// Append a step.
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Register a teardown action up front.
    ///
    /// Up-front actions run in reverse registration order once every step's
    /// cleanup has run.
    #[must_use]
    pub fn with_teardown(mut self, action: CleanupAction) -> Self {
        self.teardown.push(action);
        self
    }

    /// Replace the cleanup settings.
    #[must_use]
    pub const fn with_cleanup(mut self, cleanup: CleanupSettings) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Bound the whole flow by `deadline`.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Names of the steps, in order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }

    /// Names of the up-front teardown actions, in registration order.
    #[must_use]
    pub fn teardown_names(&self) -> Vec<&str> {
        self.teardown.iter().map(CleanupAction::name).collect()
    }
}

/// Run a flow to completion.
///
/// Steps run strictly in order. When a deadline is set, it behaves as a
/// cancellation that fires once the deadline passes. Cleanup always runs.
pub async fn run_flow(spec: FlowSpec, cancel: &CancelToken) -> FlowReport {
    let FlowSpec {
        name,
        steps,
        teardown,
        cleanup,
        deadline,
    } = spec;
    info!(flow = %name, deadline = ?deadline, "running flow");
    let sequencer = teardown
        .into_iter()
        .fold(StepSequencer::new(name, cleanup), StepSequencer::teardown)
        .steps(steps);

    let Some(limit) = deadline else {
        return sequencer.run(cancel).await;
    };
    let (bounded, driver) = cancel.with_deadline(limit);
    let report = sequencer.run(&bounded).await;
    driver.abort();
    report
}
