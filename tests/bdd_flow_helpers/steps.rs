//! Given/when steps for flow scenarios.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rstest_bdd_macros::{given, when};
use stepflow::api::{FlowSpec, run_flow};
use stepflow::engine::{PollSpec, RetryPolicy, Step, cancellation};
use stepflow::error::{FlowError, OperationError};

use super::StepResult;
use super::state::{FlowScenario, RunSnapshot, StepPlan};

type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: &Journal, entry: String) {
    journal
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(entry);
}

fn add_step(flow_scenario: &FlowScenario, step: StepPlan) {
    let mut plan = flow_scenario.plan.get().unwrap_or_default();
    plan.push(step);
    flow_scenario.plan.set(plan);
}

#[given("a step {name} that succeeds")]
fn step_succeeds(flow_scenario: &FlowScenario, name: String) {
    add_step(
        flow_scenario,
        StepPlan::Succeeds {
            name,
            cleanup: false,
        },
    );
}

#[given("a step {name} that succeeds with cleanup")]
fn step_succeeds_with_cleanup(flow_scenario: &FlowScenario, name: String) {
    add_step(
        flow_scenario,
        StepPlan::Succeeds {
            name,
            cleanup: true,
        },
    );
}

#[given("a step {name} that fails with {message}")]
fn step_fails(flow_scenario: &FlowScenario, name: String, message: String) {
    add_step(flow_scenario, StepPlan::Fails { name, message });
}

#[given("a step {name} that fails {failures} times before succeeding with {attempts} attempts")]
fn step_is_flaky(flow_scenario: &FlowScenario, name: String, failures: u32, attempts: u32) {
    add_step(
        flow_scenario,
        StepPlan::Flaky {
            name,
            failures,
            attempts,
        },
    );
}

#[given("a step {name} that is ready after {checks} checks")]
fn step_is_ready_after(flow_scenario: &FlowScenario, name: String, checks: u32) {
    add_step(flow_scenario, StepPlan::ReadyAfter { name, checks });
}

#[given("a step {name} that is never ready within {timeout_secs} seconds")]
fn step_is_never_ready(flow_scenario: &FlowScenario, name: String, timeout_secs: u64) {
    add_step(flow_scenario, StepPlan::NeverReady { name, timeout_secs });
}

#[given("the flow is cancelled after {seconds} seconds")]
fn flow_is_cancelled_after(flow_scenario: &FlowScenario, seconds: u64) {
    flow_scenario.cancel_after_secs.set(seconds);
}

fn recording(
    journal: &Journal,
    entry: String,
) -> impl Fn() -> std::future::Ready<Result<(), OperationError>> + Send + Sync + 'static {
    let log = Arc::clone(journal);
    move || {
        note(&log, entry.clone());
        std::future::ready(Ok(()))
    }
}

fn counting_probe(
    journal: &Journal,
    name: &str,
    ready_at: Option<u32>,
) -> impl Fn() -> std::future::Ready<Result<bool, OperationError>> + Send + Sync + 'static {
    let log = Arc::clone(journal);
    let entry = format!("check {name}");
    let checks = Arc::new(AtomicU32::new(0));
    move || {
        note(&log, entry.clone());
        let seen = checks.fetch_add(1, Ordering::SeqCst) + 1;
        std::future::ready(Ok(ready_at.is_some_and(|target| seen >= target)))
    }
}

fn build_step(plan: &StepPlan, journal: &Journal) -> StepResult<Step> {
    let step = match plan {
        StepPlan::Succeeds { name, cleanup } => {
            let base = Step::invoke(name.as_str(), recording(journal, name.clone()));
            if *cleanup {
                base.with_cleanup(
                    format!("undo-{name}"),
                    recording(journal, format!("undo {name}")),
                )
            } else {
                base
            }
        }
        StepPlan::Fails { name, message } => {
            let log = Arc::clone(journal);
            let entry = name.clone();
            let reason = message.clone();
            Step::invoke(name.as_str(), move || {
                note(&log, entry.clone());
                std::future::ready(Err(OperationError::terminal(reason.clone())))
            })
        }
        StepPlan::Flaky {
            name,
            failures,
            attempts,
        } => {
            let log = Arc::clone(journal);
            let entry = name.clone();
            let remaining = Arc::new(AtomicU32::new(*failures));
            let policy = RetryPolicy::new(*attempts).map_err(|e| e.to_string())?;
            Step::invoke(name.as_str(), move || {
                note(&log, entry.clone());
                let failing = remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                        left.checked_sub(1)
                    })
                    .is_ok();
                std::future::ready(if failing {
                    Err(OperationError::transient("connection reset"))
                } else {
                    Ok(())
                })
            })
            .with_retry(policy)
        }
        StepPlan::ReadyAfter { name, checks } => {
            let spec = PollSpec::from_secs(1, 60).map_err(|e| e.to_string())?;
            Step::poll(
                name.as_str(),
                spec,
                counting_probe(journal, name, Some(*checks)),
            )
        }
        StepPlan::NeverReady { name, timeout_secs } => {
            let spec = PollSpec::from_secs(1, *timeout_secs).map_err(|e| e.to_string())?;
            Step::poll(name.as_str(), spec, counting_probe(journal, name, None))
        }
    };
    Ok(step)
}

#[when("the flow runs")]
fn flow_runs(flow_scenario: &FlowScenario) -> StepResult<()> {
    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    let plan = flow_scenario.plan.get().unwrap_or_default();
    let steps = plan
        .iter()
        .map(|step| build_step(step, &journal))
        .collect::<StepResult<Vec<_>>>()?;
    let spec = steps
        .into_iter()
        .fold(FlowSpec::new("scenario"), FlowSpec::step);
    let cancel_after = flow_scenario.cancel_after_secs.get();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .map_err(|e| format!("failed to create runtime: {e}"))?;
    let report = runtime.block_on(async move {
        let (handle, token) = cancellation();
        if let Some(seconds) = cancel_after {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                handle.cancel();
            });
        }
        run_flow(spec, &token).await
    });

    let error = report.outcome.as_ref().err();
    let snapshot = RunSnapshot {
        state: report.state,
        error: error.map(ToString::to_string),
        failed_step: error.and_then(FlowError::failed_step).map(String::from),
        timed_out: error.is_some_and(FlowError::is_timeout),
        cancelled: error.is_some_and(FlowError::is_cancelled),
        steps: report.steps.clone(),
        journal: journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone(),
    };
    flow_scenario.run.set(snapshot);
    Ok(())
}
