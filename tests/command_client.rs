#![cfg(unix)]

use std::time::Duration;

use querydrive::exec::command::{CommandClient, OutputFormat};
use querydrive::exec::{EngineClient, ExecutorParams, ExecutorRegistry};
use querydrive::types::ExecutionStatus;
use querydrive_test_utils::with_timeout;
use serde_json::json;

async fn wait_terminal(client: &mut CommandClient) -> ExecutionStatus {
    loop {
        let status = client.get_status().await;
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn stdout_lines_become_the_result() {
    let mut client = CommandClient::new("sh", OutputFormat::Lines);
    client.execute("echo one; echo two; echo progress >&2").await;

    let status = with_timeout(wait_terminal(&mut client)).await;
    assert_eq!(status, ExecutionStatus::Done);
    let result = client.get_results().await.unwrap();
    assert_eq!(result.rows, vec![vec![json!("one")], vec![json!("two")]]);
    assert_eq!(client.get_logs().await, "progress\n");
    client.close().await;
}

#[tokio::test]
async fn csv_output_uses_header_line() {
    let mut client = CommandClient::new("sh", OutputFormat::Csv);
    client.execute("printf 'id,name\\n1,alice\\n2,bob\\n'").await;

    assert_eq!(with_timeout(wait_terminal(&mut client)).await, ExecutionStatus::Done);
    let result = client.get_results().await.unwrap();
    assert_eq!(result.columns, vec!["id", "name"]);
    assert_eq!(result.rows[1], vec![json!("2"), json!("bob")]);
}

#[tokio::test]
async fn non_zero_exit_is_an_error_with_exit_code_logged() {
    let mut client = CommandClient::new("sh", OutputFormat::Lines);
    client.execute("echo 'relation missing' >&2; exit 3").await;

    assert_eq!(with_timeout(wait_terminal(&mut client)).await, ExecutionStatus::Error);
    assert!(client.get_results().await.is_none());
    let logs = client.get_logs().await;
    assert!(logs.contains("relation missing"));
    assert_eq!(logs.lines().last(), Some("process exited with code 3"));
}

#[tokio::test]
async fn missing_shell_is_captured_not_raised() {
    let mut client = CommandClient::new("/definitely/not/a/shell", OutputFormat::Lines);
    client.execute("echo hi").await;
    assert_eq!(client.get_status().await, ExecutionStatus::Error);
    assert!(client.get_logs().await.contains("spawning job"));
}

#[tokio::test]
async fn cancel_kills_a_running_job() {
    let mut client = CommandClient::new("sh", OutputFormat::Lines);
    assert!(client.capabilities().supports_cancellation);
    client.execute("sleep 30").await;
    assert_eq!(client.get_status().await, ExecutionStatus::Running);

    assert!(with_timeout(client.cancel()).await);
    assert_eq!(client.get_status().await, ExecutionStatus::Cancel);
    assert!(!client.cancel().await);
    client.close().await;
    client.close().await;
}

#[tokio::test]
async fn factory_rejects_unknown_output_format() {
    let registry = ExecutorRegistry::builtin();
    let spec = registry.get_executor_class("shell", "command").unwrap();
    let err = spec
        .create_client(&ExecutorParams::new().with("output_format", "parquet"))
        .err()
        .unwrap();
    assert!(err.to_string().contains("parquet"));
}

#[tokio::test]
async fn background_process_holding_output_does_not_block_status() {
    let mut client = CommandClient::new("sh", OutputFormat::Lines);
    client.execute("sleep 3 & echo hi").await;

    let started = std::time::Instant::now();
    let status = with_timeout(wait_terminal(&mut client)).await;
    assert_eq!(status, ExecutionStatus::Done);
    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());

    let result = client.get_results().await.unwrap();
    assert_eq!(result.rows, vec![vec![json!("hi")]]);
    client.close().await;
}
