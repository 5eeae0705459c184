use std::error::Error;
use std::time::Duration;

use querydrive::engine::{
    ExecutionId, ExecutionRecord, ResultHandle, TIMEOUT_MARKER,
};
use querydrive::errors::QueryDriveError;
use querydrive::exec::QueryResult;
use querydrive::types::ExecutionStatus;

type TestResult = Result<(), Box<dyn Error>>;

const ALL: [ExecutionStatus; 5] = [
    ExecutionStatus::Initialized,
    ExecutionStatus::Running,
    ExecutionStatus::Done,
    ExecutionStatus::Error,
    ExecutionStatus::Cancel,
];

fn record() -> ExecutionRecord {
    ExecutionRecord::new(ExecutionId::from("exec-1"), "warehouse", "alice")
}

#[test]
fn only_the_five_documented_edges_are_legal() {
    use ExecutionStatus::*;
    let legal = [
        (Initialized, Running),
        (Running, Done),
        (Running, Error),
        (Running, Cancel),
        (Initialized, Cancel),
    ];
    for from in ALL {
        for to in ALL {
            assert_eq!(
                from.can_transition_to(to),
                legal.contains(&(from, to)),
                "{from} -> {to}"
            );
        }
    }
}

#[test]
fn terminal_states_never_change() {
    for terminal in [
        ExecutionStatus::Done,
        ExecutionStatus::Error,
        ExecutionStatus::Cancel,
    ] {
        assert!(terminal.is_terminal());
        for next in ALL {
            if next == terminal {
                continue;
            }
            let mut rec = record();
            rec.status = terminal;
            let err = rec.transition(next).unwrap_err();
            assert!(matches!(err, QueryDriveError::InternalState { .. }));
            assert_eq!(rec.status, terminal);
        }
    }
}

#[test]
fn illegal_transition_reports_both_ends() {
    let mut rec = record();
    match rec.transition(ExecutionStatus::Done) {
        Err(QueryDriveError::InternalState { from, to }) => {
            assert_eq!(from, ExecutionStatus::Initialized);
            assert_eq!(to, ExecutionStatus::Done);
        }
        other => panic!("expected InternalState, got {other:?}"),
    }
}

#[test]
fn re_entering_the_current_status_is_a_no_op() -> TestResult {
    let mut rec = record();
    assert!(rec.transition(ExecutionStatus::Running)?);
    assert!(!rec.transition(ExecutionStatus::Running)?);
    assert_eq!(rec.status, ExecutionStatus::Running);
    Ok(())
}

#[test]
fn complete_attaches_result_handle() -> TestResult {
    let mut rec = record();
    rec.transition(ExecutionStatus::Running)?;
    let handle = ResultHandle::for_result(&QueryResult::from_lines(["42"]))?;
    rec.complete(Some(handle.clone()))?;

    assert_eq!(rec.status, ExecutionStatus::Done);
    assert_eq!(rec.result, Some(handle));
    assert!(rec.outcome().is_ok());
    Ok(())
}

#[test]
fn complete_from_initialized_is_rejected_without_side_effects() {
    let mut rec = record();
    let handle = ResultHandle::from("abc");
    assert!(rec.complete(Some(handle)).is_err());
    assert_eq!(rec.result, None);
    assert_eq!(rec.status, ExecutionStatus::Initialized);
}

#[test]
fn result_handles_are_content_addressed() -> TestResult {
    let a = ResultHandle::for_result(&QueryResult::from_lines(["x", "y"]))?;
    let b = ResultHandle::for_result(&QueryResult::from_lines(["x", "y"]))?;
    let c = ResultHandle::for_result(&QueryResult::from_lines(["x"]))?;
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.as_str().len(), 64);
    Ok(())
}

#[test]
fn timeout_failure_carries_marker_and_maps_to_timeout_error() -> TestResult {
    let mut rec = record();
    rec.transition(ExecutionStatus::Running)?;
    rec.fail_timeout(Duration::from_secs(5))?;

    assert_eq!(rec.status, ExecutionStatus::Error);
    assert!(rec.timed_out);
    assert!(rec.error.as_deref().unwrap().starts_with(TIMEOUT_MARKER));
    assert!(matches!(rec.outcome(), Err(QueryDriveError::Timeout(_))));
    Ok(())
}

#[test]
fn outcome_maps_every_terminal_state() -> TestResult {
    let mut failed = record();
    failed.transition(ExecutionStatus::Running)?;
    failed.fail("table not found")?;
    match failed.outcome() {
        Err(QueryDriveError::ClientExecution(msg)) => assert_eq!(msg, "table not found"),
        other => panic!("unexpected {other:?}"),
    }

    let mut cancelled = record();
    cancelled.transition(ExecutionStatus::Cancel)?;
    assert!(matches!(cancelled.outcome(), Err(QueryDriveError::Cancelled)));

    let running = {
        let mut r = record();
        r.transition(ExecutionStatus::Running)?;
        r
    };
    assert!(matches!(
        running.outcome(),
        Err(QueryDriveError::InternalState { .. })
    ));
    Ok(())
}

#[test]
fn log_keeps_growing_after_terminal() -> TestResult {
    let mut rec = record();
    rec.transition(ExecutionStatus::Running)?;
    rec.append_log("line 1\n");
    rec.fail("boom")?;
    rec.append_log("late flush\n");
    rec.note("closed");

    assert!(rec.log.starts_with("line 1\nlate flush\n"));
    assert!(rec.log.ends_with("[querydrive] closed\n"));
    assert_eq!(rec.status, ExecutionStatus::Error);
    Ok(())
}

#[test]
fn record_round_trips_through_json_with_uppercase_status() -> TestResult {
    let mut rec = record();
    rec.transition(ExecutionStatus::Running)?;
    let json = serde_json::to_value(&rec)?;
    assert_eq!(json["status"], "RUNNING");
    assert_eq!(json["id"], "exec-1");

    let back: ExecutionRecord = serde_json::from_value(json)?;
    assert_eq!(back, rec);
    Ok(())
}
