// src/exec/command.rs

//! Job-submission client: the query text is submitted as a shell job.
//!
//! `execute` spawns the job and returns immediately; each `get_status` is a
//! non-blocking `try_wait`. Stdout becomes the result set and stderr the log.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::exec::backend::{BoxFuture, ClientCapabilities, EngineClient, QueryResult};
use crate::exec::factory::{ExecutorParams, ExecutorSpec, FieldType, TemplateField};
use crate::errors::QueryDriveError;
use crate::types::ExecutionStatus;

pub const LANGUAGE: &str = "shell";
pub const EXECUTOR: &str = "command";
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

pub fn executor_spec() -> ExecutorSpec {
    ExecutorSpec::new(LANGUAGE, EXECUTOR, "echo ok", |params: &ExecutorParams| {
        let client: Box<dyn EngineClient> = Box::new(CommandClient::from_params(params)?);
        Ok(client)
    })
    .with_field(
        TemplateField::optional("shell", FieldType::String, "Shell used to run the job")
            .with_default("sh"),
    )
    .with_field(TemplateField::optional(
        "working_dir",
        FieldType::String,
        "Working directory of the job",
    ))
    .with_field(
        TemplateField::optional(
            "output_format",
            FieldType::String,
            "\"lines\" (one output column) or \"csv\" (first line is the header)",
        )
        .with_default("lines"),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Lines,
    Csv,
}

#[derive(Debug)]
pub struct CommandClient {
    shell: String,
    working_dir: Option<String>,
    format: OutputFormat,
    status: ExecutionStatus,
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
    stdout: Arc<Mutex<Vec<String>>>,
    log: Arc<Mutex<String>>,
    closed: bool,
}

impl CommandClient {
    pub fn new(shell: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            shell: shell.into(),
            working_dir: None,
            format,
            status: ExecutionStatus::Initialized,
            child: None,
            readers: Vec::new(),
            stdout: Arc::new(Mutex::new(Vec::new())),
            log: Arc::new(Mutex::new(String::new())),
            closed: false,
        }
    }

    pub fn from_params(params: &ExecutorParams) -> crate::errors::Result<Self> {
        let format = match params.get_str("output_format").unwrap_or("lines") {
            "lines" => OutputFormat::Lines,
            "csv" => OutputFormat::Csv,
            other => {
                return Err(QueryDriveError::ConfigError(format!(
                    "invalid output_format '{other}' (expected \"lines\" or \"csv\")"
                )));
            }
        };
        let mut client = Self::new(params.get_str("shell").unwrap_or("sh"), format);
        client.working_dir = params.get_str("working_dir").map(str::to_string);
        Ok(client)
    }

    fn append_log(&self, line: &str) {
        append_line(&self.log, line);
    }

    fn spawn(&mut self, query: &str) -> Result<()> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(query);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning job with shell '{}'", self.shell))?;

        info!(pid = ?child.id(), shell = %self.shell, "job submitted");

        if let Some(stdout) = child.stdout.take() {
            let sink = Arc::clone(&self.stdout);
            self.readers.push(spawn_reader(stdout, move |line| {
                if let Ok(mut guard) = sink.lock() {
                    guard.push(line);
                }
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let sink = Arc::clone(&self.log);
            self.readers.push(spawn_reader(stderr, move |line| append_line(&sink, &line)));
        }

        self.child = Some(child);
        Ok(())
    }

    /// Wait for the pipe readers so the buffers are complete before the job
    /// is reported as terminal.
    /// Collect the output still in flight after the job exited. Processes the
    /// job left running in the background may keep the pipes open, so the
    /// wait is bounded and readers still running afterwards are detached.
    async fn drain_readers(&mut self) {
        let deadline = Instant::now() + OUTPUT_DRAIN_TIMEOUT;
        for mut handle in self.readers.drain(..) {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "job output reader failed"),
                Err(_) => {
                    debug!("job output still open after exit; keeping what was read");
                    handle.abort();
                }
            }
        }
    }

    async fn kill_child(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        if let Err(e) = child.kill().await {
            warn!(error = %e, "failed to kill job process");
            return false;
        }
        true
    }

    fn build_result(&self) -> QueryResult {
        let lines = self
            .stdout
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default();
        match self.format {
            OutputFormat::Lines => QueryResult::from_lines(lines),
            OutputFormat::Csv => parse_csv(&lines),
        }
    }
}

impl EngineClient for CommandClient {
    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            supports_cancellation: true,
            supports_reattach: false,
            synchronous: false,
        }
    }

    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.status != ExecutionStatus::Initialized {
                warn!(status = %self.status, "command client asked to execute twice; ignoring");
                return;
            }
            self.status = ExecutionStatus::Running;
            if let Err(err) = self.spawn(query) {
                self.append_log(&format!("{err:#}"));
                self.status = ExecutionStatus::Error;
            }
        })
    }

    fn get_status(&mut self) -> BoxFuture<'_, ExecutionStatus> {
        Box::pin(async move {
            if self.status != ExecutionStatus::Running {
                return self.status;
            }
            let Some(child) = self.child.as_mut() else {
                return self.status;
            };

            match child.try_wait() {
                Ok(None) => {}
                Ok(Some(exit)) => {
                    self.drain_readers().await;
                    let code = exit.code().unwrap_or(-1);
                    debug!(exit_code = code, "job exited");
                    if exit.success() {
                        self.status = ExecutionStatus::Done;
                    } else {
                        self.append_log(&format!("process exited with code {code}"));
                        self.status = ExecutionStatus::Error;
                    }
                    self.child = None;
                }
                Err(e) => {
                    self.append_log(&format!("failed to query job status: {e}"));
                    self.kill_child().await;
                    self.child = None;
                    self.status = ExecutionStatus::Error;
                }
            }
            self.status
        })
    }

    fn get_logs(&mut self) -> BoxFuture<'_, String> {
        let logs = self.log.lock().map(|g| g.clone()).unwrap_or_default();
        Box::pin(async move { logs })
    }

    fn get_results(&mut self) -> BoxFuture<'_, Option<QueryResult>> {
        let result = (self.status == ExecutionStatus::Done).then(|| self.build_result());
        Box::pin(async move { result })
    }

    fn cancel(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            match self.status {
                ExecutionStatus::Initialized => {
                    self.status = ExecutionStatus::Cancel;
                    true
                }
                ExecutionStatus::Running => {
                    if !self.kill_child().await {
                        return false;
                    }
                    info!("job killed on cancellation");
                    self.child = None;
                    for handle in self.readers.drain(..) {
                        handle.abort();
                    }
                    self.status = ExecutionStatus::Cancel;
                    true
                }
                _ => false,
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return;
            }
            self.closed = true;
            if self.child.is_some() {
                debug!("closing command client with a live job; killing it");
                self.kill_child().await;
                self.child = None;
            }
            for handle in self.readers.drain(..) {
                handle.abort();
            }
        })
    }
}

fn spawn_reader<R, F>(stream: R, mut on_line: F) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnMut(String) + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            on_line(line);
        }
    })
}

fn append_line(buf: &Mutex<String>, line: &str) {
    if let Ok(mut guard) = buf.lock() {
        guard.push_str(line);
        guard.push('\n');
    }
}

/// Header line plus comma separated rows. No quoting support.
fn parse_csv(lines: &[String]) -> QueryResult {
    let mut iter = lines.iter().filter(|l| !l.trim().is_empty());
    let Some(header) = iter.next() else {
        return QueryResult::default();
    };
    let mut result = QueryResult::new(header.split(',').map(|c| c.trim().to_string()).collect());
    for line in iter {
        result.rows.push(
            line.split(',')
                .map(|v| Value::String(v.trim().to_string()))
                .collect(),
        );
    }
    result
}
