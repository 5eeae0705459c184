use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use querydrive::checker::{
    CONNECTION_CHECKER, CheckerRegistry, EngineStatusService, NULL_CHECKER, ProbeOptions,
    ProbeOutcome, SELECT_ONE_CHECKER, run_probe,
};
use querydrive::config::{EngineConfig, EngineDescriptor};
use querydrive::errors::QueryDriveError;
use querydrive::exec::{EngineClient, ExecutorParams, ExecutorRegistry, ExecutorSpec};
use querydrive::types::{CheckStatus, ExecutionStatus};
use querydrive_test_utils::builders::EngineConfigBuilder;
use querydrive_test_utils::fake_client::{FakeClient, fake_executor_spec};
use querydrive_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn fast() -> ProbeOptions {
    ProbeOptions {
        max_ticks: 3,
        interval: Duration::from_millis(1),
    }
}

fn descriptor(name: &str, cfg: EngineConfig) -> EngineDescriptor {
    EngineDescriptor::from_config(name, cfg)
}

fn service_with(spec: ExecutorSpec) -> Result<EngineStatusService, Box<dyn Error>> {
    let mut executors = ExecutorRegistry::builtin();
    executors.register(spec)?;
    Ok(EngineStatusService::new(
        Arc::new(executors),
        Arc::new(CheckerRegistry::builtin()),
        fast(),
        Duration::from_secs(60),
    ))
}

#[tokio::test]
async fn null_checker_reports_ok_without_touching_the_engine() -> TestResult {
    init_tracing();
    let fake = FakeClient::new();
    let probe = fake.probe();
    let service = service_with(fake_executor_spec("fake", "probe", fake))?;
    let engine = descriptor("quiet", EngineConfigBuilder::new("fake", "probe").build());

    let report = service.check_engine(&engine).await?;
    assert_eq!(report.status, CheckStatus::Ok);
    assert!(probe.counters().executed.is_empty());
    Ok(())
}

#[tokio::test]
async fn connection_checker_runs_the_probe_query_of_the_executor() -> TestResult {
    init_tracing();
    let service = service_with(fake_executor_spec("fake", "probe", FakeClient::new()))?;
    let engine = descriptor(
        "scratch",
        EngineConfigBuilder::script().checker(CONNECTION_CHECKER).build(),
    );

    let report = with_timeout(service.check_engine(&engine)).await?;
    assert_eq!(report.status, CheckStatus::Ok, "{:?}", report.messages);
    assert!(report.messages[0].contains("scratch"));
    Ok(())
}

#[tokio::test]
async fn probe_still_running_after_budget_is_a_warning_and_is_closed() -> TestResult {
    init_tracing();
    let fake = FakeClient::new().steady(ExecutionStatus::Running);
    let probe = fake.probe();
    let spec = fake_executor_spec("fake", "probe", fake);

    let outcome = with_timeout(run_probe(&spec, &ExecutorParams::new(), "SELECT 1", fast())).await;
    assert_eq!(outcome, ProbeOutcome::StillRunning { ticks: 3 });
    let report = outcome.into_report("slow");
    assert_eq!(report.status, CheckStatus::Warn);

    let counters = probe.counters();
    assert_eq!(counters.executed, vec!["SELECT 1".to_string()]);
    assert_eq!(counters.cancel_calls, 1);
    assert_eq!(counters.close_calls, 1);
    Ok(())
}

#[tokio::test]
async fn client_construction_failure_is_an_error_report() -> TestResult {
    init_tracing();
    let spec = ExecutorSpec::new("fake", "broken", "SELECT 1", |_params: &ExecutorParams| {
        let err: querydrive::errors::Result<Box<dyn EngineClient>> = Err(
            QueryDriveError::ConfigError("coordinator unreachable".to_string()),
        );
        err
    });
    let service = service_with(spec)?;
    let engine = descriptor(
        "down",
        EngineConfigBuilder::new("fake", "broken")
            .checker(CONNECTION_CHECKER)
            .build(),
    );

    let report = service.check_engine(&engine).await?;
    assert_eq!(report.status, CheckStatus::Error);
    assert!(report.messages[0].contains("coordinator unreachable"));
    Ok(())
}

#[tokio::test]
async fn select_one_warns_on_empty_result_and_errors_on_failure() -> TestResult {
    init_tracing();
    let empty = FakeClient::new()
        .then(ExecutionStatus::Done)
        .with_result(None);
    let service = service_with(fake_executor_spec("fake", "probe", empty))?;
    let engine = descriptor(
        "hollow",
        EngineConfigBuilder::new("fake", "probe")
            .checker(SELECT_ONE_CHECKER)
            .build(),
    );
    let report = with_timeout(service.check_engine(&engine)).await?;
    assert_eq!(report.status, CheckStatus::Warn);
    assert!(report.messages.iter().any(|m| m == "probe returned no rows"));

    let failing = FakeClient::new().then_log(ExecutionStatus::Error, "line 1: syntax error");
    let service = service_with(fake_executor_spec("fake", "probe", failing))?;
    let report = with_timeout(service.check_engine(&engine)).await?;
    assert_eq!(report.status, CheckStatus::Error);
    assert_eq!(report.messages.last().map(String::as_str), Some("line 1: syntax error"));
    Ok(())
}

#[tokio::test]
async fn unknown_checker_is_a_config_error() -> TestResult {
    let service = service_with(fake_executor_spec("fake", "probe", FakeClient::new()))?;
    let engine = descriptor(
        "odd",
        EngineConfigBuilder::new("fake", "probe")
            .checker("telepathy")
            .build(),
    );
    let err = service.check_engine(&engine).await.unwrap_err();
    assert!(matches!(err, QueryDriveError::ConfigError(ref m) if m.contains("telepathy")));
    Ok(())
}

#[tokio::test]
async fn sql_checker_is_refused_for_script_engines() -> TestResult {
    let service = service_with(fake_executor_spec("fake", "probe", FakeClient::new()))?;
    let engine = descriptor(
        "scratch",
        EngineConfigBuilder::script().checker(SELECT_ONE_CHECKER).build(),
    );
    let err = service.check_engine(&engine).await.unwrap_err();
    assert!(matches!(err, QueryDriveError::ConfigError(ref m) if m.contains("SQL")));
    Ok(())
}

#[tokio::test]
async fn reports_are_cached_until_invalidated() -> TestResult {
    init_tracing();
    let fake = FakeClient::new().then(ExecutionStatus::Done);
    let probe = fake.probe();
    let service = service_with(fake_executor_spec("fake", "probe", fake))?;
    let engine = descriptor(
        "cached",
        EngineConfigBuilder::new("fake", "probe")
            .checker(CONNECTION_CHECKER)
            .build(),
    );

    let first = with_timeout(service.check_engine(&engine)).await?;
    let second = with_timeout(service.check_engine(&engine)).await?;
    assert_eq!(first, second);
    assert_eq!(probe.counters().executed.len(), 1);

    service.invalidate("cached");
    with_timeout(service.check_engine(&engine)).await?;
    assert_eq!(probe.counters().executed.len(), 2);
    Ok(())
}

#[test]
fn builtin_registry_lists_every_checker() {
    let registry = CheckerRegistry::builtin();
    assert_eq!(
        registry.names(),
        vec![NULL_CHECKER, CONNECTION_CHECKER, SELECT_ONE_CHECKER]
    );
    assert!(registry.get_engine_checker_class("select_one").is_ok());
}
