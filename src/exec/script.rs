// src/exec/script.rs

//! In-process script runtime.
//!
//! A tiny line-oriented language evaluated inside the worker:
//!
//! ```text
//! # comment
//! log starting
//! columns id,name
//! row 1,"alice"
//! print done
//! sleep 250ms
//! fail something went wrong
//! ```
//!
//! Execution is synchronous: `execute` only returns once the script is
//! terminal, and there is no point at which it can be interrupted.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::duration::parse_duration;
use crate::exec::backend::{BoxFuture, ClientCapabilities, EngineClient, QueryResult};
use crate::exec::factory::{ExecutorParams, ExecutorSpec, FieldType, TemplateField};
use crate::types::ExecutionStatus;

pub const LANGUAGE: &str = "script";
pub const EXECUTOR: &str = "inline";
const DEFAULT_MAX_ROWS: u64 = 10_000;

static STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<op>[a-z]+)(?:\s+(?P<arg>.*))?$").expect("statement pattern is valid")
});

pub fn executor_spec() -> ExecutorSpec {
    ExecutorSpec::new(LANGUAGE, EXECUTOR, "print ok", |params: &ExecutorParams| {
        let client: Box<dyn EngineClient> = Box::new(ScriptClient::from_params(params));
        Ok(client)
    })
    .with_field(
        TemplateField::optional(
            "max_rows",
            FieldType::Integer,
            "Fail the script when it produces more rows than this",
        )
        .with_default(DEFAULT_MAX_ROWS),
    )
}

#[derive(Debug)]
pub struct ScriptClient {
    status: ExecutionStatus,
    max_rows: usize,
    stdout: Vec<String>,
    log: String,
    columns: Option<Vec<String>>,
    rows: Vec<Vec<Value>>,
    result: Option<QueryResult>,
    closed: bool,
}

impl ScriptClient {
    pub fn new(max_rows: usize) -> Self {
        Self {
            status: ExecutionStatus::Initialized,
            max_rows,
            stdout: Vec::new(),
            log: String::new(),
            columns: None,
            rows: Vec::new(),
            result: None,
            closed: false,
        }
    }

    pub fn from_params(params: &ExecutorParams) -> Self {
        let max_rows = params.get_u64("max_rows").unwrap_or(DEFAULT_MAX_ROWS);
        Self::new(usize::try_from(max_rows).unwrap_or(usize::MAX))
    }

    async fn run_script(&mut self, query: &str) -> std::result::Result<(), String> {
        for (idx, raw_line) in query.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let caps = STATEMENT
                .captures(line)
                .ok_or_else(|| format!("line {line_no}: cannot parse statement '{line}'"))?;
            let op = &caps["op"];
            let arg = caps.name("arg").map(|m| m.as_str().trim()).unwrap_or("");

            match op {
                "print" => self.stdout.push(arg.to_string()),
                "log" => self.push_log(arg),
                "columns" => {
                    if !self.rows.is_empty() {
                        return Err(format!("line {line_no}: columns declared after rows"));
                    }
                    self.columns = Some(split_fields(arg).map(str::to_string).collect());
                }
                "row" => {
                    let row: Vec<Value> = split_fields(arg).map(parse_value).collect();
                    if let Some(columns) = &self.columns {
                        if columns.len() != row.len() {
                            return Err(format!(
                                "line {line_no}: row has {} values but {} columns are declared",
                                row.len(),
                                columns.len()
                            ));
                        }
                    }
                    if self.rows.len() >= self.max_rows {
                        return Err(format!(
                            "line {line_no}: result exceeds max_rows ({})",
                            self.max_rows
                        ));
                    }
                    self.rows.push(row);
                }
                "sleep" => {
                    let dur = parse_duration(arg).map_err(|e| format!("line {line_no}: {e}"))?;
                    tokio::time::sleep(dur).await;
                }
                "fail" => {
                    let msg = if arg.is_empty() { "script failed" } else { arg };
                    return Err(format!("line {line_no}: {msg}"));
                }
                other => return Err(format!("line {line_no}: unknown statement '{other}'")),
            }
        }
        Ok(())
    }

    fn push_log(&mut self, line: &str) {
        self.log.push_str(line);
        self.log.push('\n');
    }

    fn build_result(&mut self) -> std::result::Result<QueryResult, String> {
        if let Some(columns) = self.columns.take() {
            return Ok(QueryResult {
                columns,
                rows: std::mem::take(&mut self.rows),
            });
        }
        if !self.rows.is_empty() {
            let width = self.rows.iter().map(Vec::len).max().unwrap_or(0);
            return Ok(QueryResult {
                columns: (1..=width).map(|i| format!("col{i}")).collect(),
                rows: std::mem::take(&mut self.rows),
            });
        }
        if self.stdout.len() > self.max_rows {
            return Err(format!("output exceeds max_rows ({})", self.max_rows));
        }
        Ok(QueryResult::from_lines(std::mem::take(&mut self.stdout)))
    }
}

impl EngineClient for ScriptClient {
    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            supports_cancellation: false,
            supports_reattach: false,
            synchronous: true,
        }
    }

    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.status != ExecutionStatus::Initialized {
                warn!(status = %self.status, "script client asked to execute twice; ignoring");
                return;
            }
            self.status = ExecutionStatus::Running;

            let outcome = match self.run_script(query).await {
                Ok(()) => self.build_result(),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(result) => {
                    debug!(rows = result.row_count(), "script finished");
                    self.result = Some(result);
                    self.status = ExecutionStatus::Done;
                }
                Err(msg) => {
                    self.push_log(&msg);
                    self.status = ExecutionStatus::Error;
                }
            }
        })
    }

    fn get_status(&mut self) -> BoxFuture<'_, ExecutionStatus> {
        let status = self.status;
        Box::pin(async move { status })
    }

    fn get_logs(&mut self) -> BoxFuture<'_, String> {
        let logs = self.log.clone();
        Box::pin(async move { logs })
    }

    fn get_results(&mut self) -> BoxFuture<'_, Option<QueryResult>> {
        let result = match self.status {
            ExecutionStatus::Done => self.result.clone(),
            _ => None,
        };
        Box::pin(async move { result })
    }

    fn cancel(&mut self) -> BoxFuture<'_, bool> {
        // Nothing to interrupt before execute(); afterwards the script has
        // already run to completion.
        let accepted = self.status == ExecutionStatus::Initialized;
        if accepted {
            self.status = ExecutionStatus::Cancel;
        }
        Box::pin(async move { accepted })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        if !self.closed {
            self.closed = true;
            self.stdout.clear();
            self.rows.clear();
            self.columns = None;
        }
        Box::pin(async {})
    }
}

fn split_fields(arg: &str) -> impl Iterator<Item = &str> {
    arg.split(',').map(str::trim).filter(|f| !f.is_empty())
}

/// JSON scalars stay typed (`1`, `true`, `"quoted"`); anything else is a
/// bare string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str::<Value>(raw)
        .ok()
        .filter(|v| !v.is_object() && !v.is_array())
        .unwrap_or_else(|| Value::String(raw.to_string()))
}
