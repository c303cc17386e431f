//! Scenario state for flow behavioural tests.

use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::ScenarioState;
use stepflow::api::{FlowState, StepRecord};

/// One step as described by a scenario.
#[derive(Debug, Clone)]
pub(crate) enum StepPlan {
    /// Succeeds on the first call, optionally with a teardown.
    Succeeds { name: String, cleanup: bool },
    /// Fails terminally with `message`.
    Fails { name: String, message: String },
    /// Fails `failures` times, then succeeds; runs under `attempts`.
    Flaky {
        name: String,
        failures: u32,
        attempts: u32,
    },
    /// A poll whose probe holds on the `checks`-th evaluation.
    ReadyAfter { name: String, checks: u32 },
    /// A poll whose probe never holds.
    NeverReady { name: String, timeout_secs: u64 },
}

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub(crate) struct RunSnapshot {
    pub(crate) state: FlowState,
    pub(crate) error: Option<String>,
    pub(crate) failed_step: Option<String>,
    pub(crate) timed_out: bool,
    pub(crate) cancelled: bool,
    pub(crate) steps: Vec<StepRecord>,
    pub(crate) journal: Vec<String>,
}

#[derive(Default, ScenarioState)]
pub(crate) struct FlowScenario {
    pub(crate) plan: Slot<Vec<StepPlan>>,
    pub(crate) cancel_after_secs: Slot<u64>,
    pub(crate) run: Slot<RunSnapshot>,
}

#[fixture]
pub(crate) fn flow_scenario() -> FlowScenario {
    let state = FlowScenario::default();
    state.plan.set(Vec::new());
    state
}
