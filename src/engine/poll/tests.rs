//! Unit tests for the condition poller.
//!
//! All timing tests run on a paused Tokio clock so multi-second schedules
//! complete instantly and deterministically.

use std::time::Duration;

use rstest::rstest;
use tokio::time::Instant;

use super::{ConditionPoller, PollSpec};
use crate::engine::cancel::{CancelToken, cancellation};
use crate::error::{ConfigError, FlowError, OperationError, WaitError};

fn poller(interval_secs: u64, timeout_secs: u64) -> ConditionPoller {
    ConditionPoller::new(
        PollSpec::from_secs(interval_secs, timeout_secs).expect("poll spec should be valid"),
    )
}

#[rstest]
#[case(0, 10, "interval")]
#[case(5, 4, "timeout")]
fn poll_spec_rejects_invalid_values(
    #[case] interval_secs: u64,
    #[case] timeout_secs: u64,
    #[case] expected_field: &str,
) {
    let error = PollSpec::from_secs(interval_secs, timeout_secs)
        .expect_err("poll spec should be rejected");
    match error {
        ConfigError::InvalidValue { field, .. } => assert_eq!(field, expected_field),
        other => panic!("expected InvalidValue, got {other:?}"),
    }
}

#[rstest]
fn poll_spec_accepts_timeout_equal_to_interval() {
    let spec = PollSpec::from_secs(3, 3).expect("equal timeout should be accepted");
    assert_eq!(spec.interval(), Duration::from_secs(3));
    assert_eq!(spec.timeout(), Duration::from_secs(3));
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(30)]
#[tokio::test(start_paused = true)]
async fn probe_done_on_kth_attempt_is_invoked_exactly_k_times(#[case] k: u32) {
    let mut calls: u32 = 0;
    let result = poller(1, 30)
        .poll("condition", &CancelToken::never(), || {
            calls += 1;
            let current = calls;
            async move { Ok::<bool, OperationError>(current >= k) }
        })
        .await;

    assert!(result.is_ok(), "poll should succeed: {result:?}");
    assert_eq!(calls, k);
}

#[rstest]
#[case(1, 30)]
#[case(3, 10)]
#[case(7, 7)]
#[tokio::test(start_paused = true)]
async fn never_done_probe_times_out_within_one_interval_of_timeout(
    #[case] interval_secs: u64,
    #[case] timeout_secs: u64,
) {
    let started = Instant::now();
    let result = poller(interval_secs, timeout_secs)
        .poll("never", &CancelToken::never(), || async {
            Ok::<bool, OperationError>(false)
        })
        .await;
    let elapsed = started.elapsed();

    let error = result.expect_err("poll should time out");
    assert!(error.is_timeout(), "expected timeout, got {error:?}");
    assert!(elapsed >= Duration::from_secs(timeout_secs));
    assert!(elapsed <= Duration::from_secs(timeout_secs + interval_secs));
}

#[tokio::test(start_paused = true)]
async fn timeout_error_names_operation_and_duration() {
    let error = poller(1, 5)
        .poll("deployment rollout", &CancelToken::never(), || async {
            Ok::<bool, OperationError>(false)
        })
        .await
        .expect_err("poll should time out");

    assert_eq!(
        error.to_string(),
        "timed out after 5s waiting for deployment rollout"
    );
}

#[tokio::test(start_paused = true)]
async fn probe_error_is_terminal_and_stops_polling() {
    let mut calls: u32 = 0;
    let result = poller(1, 30)
        .poll("condition", &CancelToken::never(), || {
            calls += 1;
            async { Err::<bool, OperationError>(OperationError::terminal("unauthorised")) }
        })
        .await;

    match result {
        Err(FlowError::Operation(OperationError::Terminal { message })) => {
            assert_eq!(message, "unauthorised");
        }
        other => panic!("expected terminal operation error, got {other:?}"),
    }
    assert_eq!(calls, 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_probe_is_abandoned_after_timeout_plus_interval() {
    let started = Instant::now();
    let result = poller(2, 10)
        .poll("stuck", &CancelToken::never(), || {
            std::future::pending::<Result<bool, OperationError>>()
        })
        .await;

    let error = result.expect_err("poll should time out");
    assert!(error.is_timeout());
    assert!(started.elapsed() <= Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_sleep_reports_cancellation_not_timeout() {
    let (handle, token) = cancellation();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.cancel();
    });

    let started = Instant::now();
    let result = poller(1, 30)
        .poll("condition", &token, || async {
            Ok::<bool, OperationError>(false)
        })
        .await;

    match result {
        Err(FlowError::Wait(WaitError::Cancelled { operation })) => {
            assert_eq!(operation, "condition");
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn already_cancelled_token_skips_the_probe() {
    let (handle, token) = cancellation();
    handle.cancel();
    let mut calls: u32 = 0;

    let result = poller(1, 30)
        .poll("condition", &token, || {
            calls += 1;
            async { Ok::<bool, OperationError>(true) }
        })
        .await;

    assert!(result.is_err_and(|error| error.is_cancelled()));
    assert_eq!(calls, 0);
}
