use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use querydrive::engine::{
    CancelListener, ExecutionId, ExecutionRecord, PollCore, PollOptions, Poller, TIMEOUT_MARKER,
    cancel_pair,
};
use querydrive::errors;
use querydrive::exec::script::ScriptClient;
use querydrive::exec::{EngineClient, QueryResult};
use querydrive::store::{ExecutionStore, MemoryStore};
use querydrive::types::{BackoffKind, ExecutionStatus};
use querydrive_test_utils::fake_client::FakeClient;
use querydrive_test_utils::stores::{FlakyStore, RecordingStore};
use querydrive_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn options() -> PollOptions {
    PollOptions {
        interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(40),
        backoff: BackoffKind::Exponential,
        timeout: Duration::from_secs(60),
        cancel_grace: Duration::from_secs(1),
    }
}

async fn run_fake(
    client: FakeClient,
    store: Arc<dyn ExecutionStore>,
    cancel: CancelListener,
    options: PollOptions,
) -> errors::Result<ExecutionRecord> {
    run_client(Box::new(client), "SELECT 1", store, cancel, options).await
}

async fn run_client(
    client: Box<dyn EngineClient>,
    query: &str,
    store: Arc<dyn ExecutionStore>,
    cancel: CancelListener,
    options: PollOptions,
) -> errors::Result<ExecutionRecord> {
    let record = ExecutionRecord::new(ExecutionId::new(), "fake", "tester");
    let core = PollCore::new(record, options);
    Poller::new(core, client, store, cancel).run(query).await
}

#[tokio::test]
async fn successful_execution_stores_result_and_closes_client() -> TestResult {
    init_tracing();
    let client = FakeClient::new()
        .then_log(ExecutionStatus::Running, "stage 1/2")
        .then_log(ExecutionStatus::Done, "stage 2/2")
        .with_result(Some(QueryResult::from_lines(["a", "b"])));
    let probe = client.probe();
    let store = Arc::new(RecordingStore::new());

    let record = with_timeout(run_fake(
        client,
        store.clone(),
        CancelListener::never(),
        options(),
    ))
    .await?;

    assert_eq!(record.status, ExecutionStatus::Done);
    assert_eq!(record.log, "stage 1/2\nstage 2/2\n");
    let handle = record.result.clone().expect("DONE record references a result");
    let stored = store.load_result(&handle)?.expect("result saved before DONE");
    assert_eq!(stored.row_count(), 2);

    let counters = probe.counters();
    assert_eq!(counters.executed, vec!["SELECT 1".to_string()]);
    assert_eq!(counters.close_calls, 1);
    assert_eq!(counters.cancel_calls, 0);

    assert_eq!(
        store.statuses(),
        vec![ExecutionStatus::Running, ExecutionStatus::Done]
    );
    let persisted = store.load_execution_record(&record.id)?.unwrap();
    assert_eq!(persisted, record);
    Ok(())
}

#[tokio::test]
async fn backend_failure_ends_in_error_with_last_log_line() -> TestResult {
    let client = FakeClient::new()
        .then_log(ExecutionStatus::Running, "planning")
        .then_log(ExecutionStatus::Error, "line 1:8: Table 'nope' does not exist");
    let probe = client.probe();

    let record = with_timeout(run_fake(
        client,
        Arc::new(MemoryStore::new()),
        CancelListener::never(),
        options(),
    ))
    .await?;

    assert_eq!(record.status, ExecutionStatus::Error);
    assert_eq!(
        record.error.as_deref(),
        Some("line 1:8: Table 'nope' does not exist")
    );
    assert!(record.result.is_none());
    assert_eq!(probe.counters().close_calls, 1);
    Ok(())
}

#[tokio::test]
async fn synchronous_client_is_terminal_on_first_observation() -> TestResult {
    let client = FakeClient::new().synchronous(ExecutionStatus::Done, "ran inline\n");
    let probe = client.probe();

    let record = with_timeout(run_fake(
        client,
        Arc::new(MemoryStore::new()),
        CancelListener::never(),
        options(),
    ))
    .await?;

    assert_eq!(record.status, ExecutionStatus::Done);
    assert_eq!(record.log, "ran inline\n");
    assert_eq!(probe.counters().status_calls, 1);
    Ok(())
}

#[tokio::test]
async fn cancel_before_start_never_executes() -> TestResult {
    let client = FakeClient::new().accept_cancel(true);
    let probe = client.probe();
    let (handle, listener) = cancel_pair();
    handle.cancel();

    let store = Arc::new(RecordingStore::new());
    let record = with_timeout(run_fake(client, store.clone(), listener, options())).await?;

    assert_eq!(record.status, ExecutionStatus::Cancel);
    assert!(record.cancel_requested);
    assert!(record.result.is_none());
    let counters = probe.counters();
    assert!(counters.executed.is_empty());
    assert_eq!(counters.cancel_calls, 1);
    assert_eq!(counters.close_calls, 1);
    assert_eq!(
        store.statuses(),
        vec![ExecutionStatus::Initialized, ExecutionStatus::Cancel]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn accepted_cancel_while_running_ends_in_cancel() -> TestResult {
    let client = FakeClient::new().accept_cancel(true);
    let probe = client.probe();
    let (handle, listener) = cancel_pair();

    let task = tokio::spawn(run_fake(
        client,
        Arc::new(MemoryStore::new()),
        listener,
        options(),
    ));
    tokio::time::sleep(Duration::from_millis(35)).await;
    handle.cancel();

    let record = task.await??;
    assert_eq!(record.status, ExecutionStatus::Cancel);
    assert!(record.result.is_none());
    let counters = probe.counters();
    assert_eq!(counters.executed.len(), 1);
    assert_eq!(counters.cancel_calls, 1);
    assert_eq!(counters.close_calls, 1);
    Ok(())
}

#[tokio::test]
async fn refused_cancel_lets_backend_decide() -> TestResult {
    let client = FakeClient::new()
        .accept_cancel(false)
        .then(ExecutionStatus::Running)
        .then(ExecutionStatus::Running)
        .then_log(ExecutionStatus::Done, "finished anyway");
    let probe = client.probe();
    let (handle, listener) = cancel_pair();
    handle.cancel();

    let record = with_timeout(run_fake(
        client,
        Arc::new(MemoryStore::new()),
        listener,
        options(),
    ))
    .await?;

    assert_eq!(record.status, ExecutionStatus::Done);
    assert!(record.cancel_unsupported);
    assert!(record.log.contains("cancellation not supported"));
    assert_eq!(probe.counters().cancel_calls, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn stuck_backend_times_out_after_grace() -> TestResult {
    let client = FakeClient::new().accept_cancel(false);
    let probe = client.probe();
    let opts = PollOptions {
        timeout: Duration::from_millis(100),
        cancel_grace: Duration::from_millis(50),
        ..options()
    };

    let record = run_fake(client, Arc::new(MemoryStore::new()), CancelListener::never(), opts)
        .await?;

    assert_eq!(record.status, ExecutionStatus::Error);
    assert!(record.timed_out);
    assert!(record.error.as_deref().unwrap().starts_with(TIMEOUT_MARKER));
    let counters = probe.counters();
    assert_eq!(counters.cancel_calls, 1);
    assert_eq!(counters.close_calls, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timeout_with_accepted_cancel_is_still_a_timeout() -> TestResult {
    let client = FakeClient::new().accept_cancel(true);
    let opts = PollOptions {
        timeout: Duration::from_millis(100),
        ..options()
    };

    let record = run_fake(client, Arc::new(MemoryStore::new()), CancelListener::never(), opts)
        .await?;

    assert_eq!(record.status, ExecutionStatus::Error);
    assert!(record.is_timeout());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn synchronous_client_running_past_timeout_is_a_timeout() -> TestResult {
    init_tracing();
    let opts = PollOptions {
        timeout: Duration::from_secs(1),
        cancel_grace: Duration::from_millis(500),
        ..options()
    };
    let started = tokio::time::Instant::now();

    let record = run_client(
        Box::new(ScriptClient::new(10)),
        "sleep 10s\nprint ok",
        Arc::new(MemoryStore::new()),
        CancelListener::never(),
        opts,
    )
    .await?;

    assert_eq!(record.status, ExecutionStatus::Error);
    assert!(record.timed_out);
    assert!(record.error.as_deref().unwrap().starts_with(TIMEOUT_MARKER));
    assert!(record.result.is_none());
    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn hanging_status_call_cannot_outlive_timeout_and_grace() -> TestResult {
    init_tracing();
    let client = FakeClient::new().hang_while_running();
    let probe = client.probe();
    let opts = PollOptions {
        timeout: Duration::from_millis(100),
        cancel_grace: Duration::from_millis(50),
        ..options()
    };
    let started = tokio::time::Instant::now();

    let record = run_fake(client, Arc::new(MemoryStore::new()), CancelListener::never(), opts)
        .await?;

    assert_eq!(record.status, ExecutionStatus::Error);
    assert!(record.error.as_deref().unwrap().starts_with(TIMEOUT_MARKER));
    assert!(started.elapsed() < Duration::from_millis(200), "{:?}", started.elapsed());
    let counters = probe.counters();
    assert_eq!(counters.cancel_calls, 1);
    assert_eq!(counters.close_calls, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn hanging_status_call_with_accepted_cancel_is_a_timeout() -> TestResult {
    let client = FakeClient::new().hang_while_running().accept_cancel(true);
    let opts = PollOptions {
        timeout: Duration::from_millis(100),
        ..options()
    };

    let record = run_fake(client, Arc::new(MemoryStore::new()), CancelListener::never(), opts)
        .await?;

    assert_eq!(record.status, ExecutionStatus::Error);
    assert!(record.is_timeout());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn completion_first_seen_after_deadline_is_a_timeout() -> TestResult {
    let client = FakeClient::new()
        .then(ExecutionStatus::Running)
        .then(ExecutionStatus::Done);
    let probe = client.probe();
    let opts = PollOptions {
        interval: Duration::from_millis(50),
        backoff: BackoffKind::Fixed,
        timeout: Duration::from_millis(20),
        ..options()
    };

    let record = run_fake(client, Arc::new(MemoryStore::new()), CancelListener::never(), opts)
        .await?;

    assert_eq!(record.status, ExecutionStatus::Error);
    assert!(record.is_timeout());
    assert!(record.result.is_none());
    assert_eq!(probe.counters().cancel_calls, 0);
    Ok(())
}

#[tokio::test]
async fn persistence_failures_do_not_abort_execution() -> TestResult {
    let client = FakeClient::new().then(ExecutionStatus::Done);
    let store = Arc::new(FlakyStore::failing_records());

    let record = with_timeout(run_fake(
        client,
        store.clone(),
        CancelListener::never(),
        options(),
    ))
    .await?;

    assert_eq!(record.status, ExecutionStatus::Done);
    assert!(store.record_attempts() >= 2);
    Ok(())
}

#[tokio::test]
async fn unsaved_result_is_never_reported_as_done() -> TestResult {
    let client = FakeClient::new().then(ExecutionStatus::Done);
    let record = with_timeout(run_fake(
        client,
        Arc::new(FlakyStore::failing_results()),
        CancelListener::never(),
        options(),
    ))
    .await?;

    assert_eq!(record.status, ExecutionStatus::Error);
    assert!(record.result.is_none());
    assert!(record.error.as_deref().unwrap().contains("result set unavailable"));
    Ok(())
}

#[tokio::test]
async fn persisted_logs_only_grow() -> TestResult {
    let client = FakeClient::new()
        .then_log(ExecutionStatus::Running, "one")
        .then_log(ExecutionStatus::Running, "two")
        .then_replace_log(ExecutionStatus::Running, "x")
        .then_log(ExecutionStatus::Done, "three");
    let store = Arc::new(RecordingStore::new());

    let record = with_timeout(run_fake(
        client,
        store.clone(),
        CancelListener::never(),
        options(),
    ))
    .await?;

    assert!(record.log.starts_with("one\ntwo\n"));
    let history = store.history();
    for pair in history.windows(2) {
        assert!(
            pair[1].log.starts_with(&pair[0].log),
            "log shrank between {:?} and {:?}",
            pair[0].log,
            pair[1].log
        );
    }
    Ok(())
}

#[tokio::test]
async fn remote_handle_is_recorded_while_running() -> TestResult {
    let client = FakeClient::new()
        .with_remote_handle("job-77")
        .then(ExecutionStatus::Running)
        .then(ExecutionStatus::Done);
    let store = Arc::new(RecordingStore::new());

    let record = with_timeout(run_fake(
        client,
        store.clone(),
        CancelListener::never(),
        options(),
    ))
    .await?;

    assert_eq!(record.remote_handle.as_deref(), Some("job-77"));
    assert!(store
        .history()
        .iter()
        .any(|r| r.status == ExecutionStatus::Running && r.remote_handle.is_some()));
    Ok(())
}
