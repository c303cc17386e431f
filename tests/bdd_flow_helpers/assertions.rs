//! Assertion steps for flow scenarios.

use rstest_bdd_macros::then;
use stepflow::api::{FlowState, StepStatus};

use super::StepResult;
use super::state::{FlowScenario, RunSnapshot};

fn finished_run(flow_scenario: &FlowScenario) -> StepResult<RunSnapshot> {
    flow_scenario
        .run
        .get()
        .ok_or_else(|| String::from("the flow should have run"))
}

fn parse_status(raw: &str) -> StepResult<StepStatus> {
    match raw {
        "pending" => Ok(StepStatus::Pending),
        "running" => Ok(StepStatus::Running),
        "succeeded" => Ok(StepStatus::Succeeded),
        "failed" => Ok(StepStatus::Failed),
        "skipped" => Ok(StepStatus::Skipped),
        other => Err(format!("unknown step status '{other}'")),
    }
}

#[then("the flow completes")]
fn flow_completes(flow_scenario: &FlowScenario) -> StepResult<()> {
    let run = finished_run(flow_scenario)?;
    if let Some(error) = run.error {
        return Err(format!("expected success, got error: {error}"));
    }
    if run.state != FlowState::Completed {
        return Err(format!("expected Completed, got {:?}", run.state));
    }
    Ok(())
}

#[then("the flow fails at step {step}")]
fn flow_fails_at(flow_scenario: &FlowScenario, step: String) -> StepResult<()> {
    let run = finished_run(flow_scenario)?;
    if run.state != FlowState::Aborted {
        return Err(format!("expected Aborted, got {:?}", run.state));
    }
    match run.failed_step {
        Some(failed) if failed == step => Ok(()),
        other => Err(format!("expected failure at '{step}', got {other:?}")),
    }
}

#[then("the flow times out at step {step}")]
fn flow_times_out_at(flow_scenario: &FlowScenario, step: String) -> StepResult<()> {
    flow_fails_at(flow_scenario, step)?;
    let run = finished_run(flow_scenario)?;
    if run.timed_out {
        Ok(())
    } else {
        Err(format!("expected a timeout, got {:?}", run.error))
    }
}

#[then("the flow is cancelled at step {step}")]
fn flow_is_cancelled_at(flow_scenario: &FlowScenario, step: String) -> StepResult<()> {
    flow_fails_at(flow_scenario, step)?;
    let run = finished_run(flow_scenario)?;
    if run.cancelled {
        Ok(())
    } else {
        Err(format!("expected a cancellation, got {:?}", run.error))
    }
}

#[then("the error message is {expected}")]
fn error_message_is(flow_scenario: &FlowScenario, expected: String) -> StepResult<()> {
    let run = finished_run(flow_scenario)?;
    match run.error {
        Some(message) if message == expected => Ok(()),
        other => Err(format!("expected error '{expected}', got {other:?}")),
    }
}

#[then("step {name} is {status}")]
fn step_has_status(flow_scenario: &FlowScenario, name: String, status: String) -> StepResult<()> {
    let expected = parse_status(&status)?;
    let run = finished_run(flow_scenario)?;
    let record = run
        .steps
        .iter()
        .find(|record| record.name == name)
        .ok_or_else(|| format!("no record for step '{name}'"))?;
    if record.status == expected {
        Ok(())
    } else {
        Err(format!(
            "expected step '{name}' to be {expected:?}, got {:?}",
            record.status
        ))
    }
}

#[then("step {name} took {attempts} attempts")]
fn step_took_attempts(flow_scenario: &FlowScenario, name: String, attempts: u32) -> StepResult<()> {
    let run = finished_run(flow_scenario)?;
    let record = run
        .steps
        .iter()
        .find(|record| record.name == name)
        .ok_or_else(|| format!("no record for step '{name}'"))?;
    if record.attempts == attempts {
        Ok(())
    } else {
        Err(format!(
            "expected {attempts} attempts for '{name}', got {}",
            record.attempts
        ))
    }
}

#[then("the journal reads {entries}")]
fn journal_reads(flow_scenario: &FlowScenario, entries: String) -> StepResult<()> {
    let run = finished_run(flow_scenario)?;
    let expected: Vec<&str> = entries.split(", ").collect();
    if run.journal == expected {
        Ok(())
    } else {
        Err(format!("expected journal {expected:?}, got {:?}", run.journal))
    }
}

#[then("the journal ends with {entry}")]
fn journal_ends_with(flow_scenario: &FlowScenario, entry: String) -> StepResult<()> {
    let run = finished_run(flow_scenario)?;
    match run.journal.last() {
        Some(last) if *last == entry => Ok(()),
        other => Err(format!("expected journal to end with '{entry}', got {other:?}")),
    }
}
