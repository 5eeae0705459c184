// src/engine/record.rs

//! Execution record and the status state machine.
//!
//! [`ExecutionRecord`] is the engine-independent projection of one execution.
//! All status changes go through [`ExecutionRecord::transition`] (or one of
//! the helpers built on it), which refuses every edge not allowed by
//! [`ExecutionStatus::can_transition_to`]. Once terminal, only the log may
//! still grow.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::{QueryDriveError, Result};
use crate::exec::QueryResult;
use crate::types::ExecutionStatus;

/// Error prefix marking executions stopped by the poller's timeout.
pub const TIMEOUT_MARKER: &str = "TimeoutError";
/// Error prefix marking executions whose worker disappeared.
pub const WORKER_LOST_MARKER: &str = "WorkerLostError";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ExecutionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Content-addressed reference to a stored result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultHandle(String);

impl ResultHandle {
    /// `blake3` of the JSON encoding of the result set.
    pub fn for_result(result: &QueryResult) -> Result<Self> {
        let bytes = serde_json::to_vec(result)?;
        Ok(Self(blake3::hash(&bytes).to_hex().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResultHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Immutable description of what to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: ExecutionId,
    pub query: String,
    /// Name of the configured engine to run against.
    pub engine: String,
    /// Session-level executor parameters layered over the engine's own.
    #[serde(default)]
    pub executor_params: crate::exec::ExecutorParams,
    pub principal: String,
}

impl ExecutionRequest {
    pub fn new(
        engine: impl Into<String>,
        query: impl Into<String>,
        principal: impl Into<String>,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            query: query.into(),
            engine: engine.into(),
            executor_params: crate::exec::ExecutorParams::default(),
            principal: principal.into(),
        }
    }

    pub fn with_params(mut self, params: crate::exec::ExecutorParams) -> Self {
        self.executor_params = params;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub engine: String,
    pub principal: String,
    pub status: ExecutionStatus,
    pub log: String,
    pub error: Option<String>,
    pub result: Option<ResultHandle>,
    pub cancel_requested: bool,
    /// Cancellation was requested but the client refused it.
    pub cancel_unsupported: bool,
    pub timed_out: bool,
    /// Token for reattaching to the remote job after a worker restart.
    pub remote_handle: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl ExecutionRecord {
    pub fn new(id: ExecutionId, engine: impl Into<String>, principal: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id,
            engine: engine.into(),
            principal: principal.into(),
            status: ExecutionStatus::Initialized,
            log: String::new(),
            error: None,
            result: None,
            cancel_requested: false,
            cancel_unsupported: false,
            timed_out: false,
            remote_handle: None,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    pub fn for_request(request: &ExecutionRequest) -> Self {
        Self::new(request.id.clone(), &request.engine, &request.principal)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`. Re-entering the current status is a no-op and returns
    /// `Ok(false)`; any edge outside the state machine is an
    /// [`QueryDriveError::InternalState`].
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<bool> {
        if self.status == next {
            return Ok(false);
        }
        if !self.status.can_transition_to(next) {
            return Err(QueryDriveError::InternalState {
                from: self.status,
                to: next,
            });
        }
        info!(
            execution_id = %self.id,
            engine = %self.engine,
            from = %self.status,
            to = %next,
            "execution status changed"
        );
        self.status = next;
        self.touch();
        Ok(true)
    }

    /// RUNNING -> DONE, attaching the already stored result.
    pub fn complete(&mut self, result: Option<ResultHandle>) -> Result<()> {
        self.guard_edge(ExecutionStatus::Done)?;
        self.result = result;
        self.transition(ExecutionStatus::Done)?;
        Ok(())
    }

    /// RUNNING -> ERROR with a message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.guard_edge(ExecutionStatus::Error)?;
        self.error = Some(message.into());
        self.transition(ExecutionStatus::Error)?;
        Ok(())
    }

    /// RUNNING -> ERROR carrying the timeout marker.
    pub fn fail_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timed_out = true;
        self.fail(format!(
            "{TIMEOUT_MARKER}: execution exceeded {}",
            crate::config::duration::format_duration(timeout)
        ))
    }

    /// Append log text. Allowed in every state, including terminal ones
    /// (final log flush). The log never shrinks.
    pub fn append_log(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.log.push_str(chunk);
        self.touch();
    }

    /// Append one poller-generated line.
    pub fn note(&mut self, line: &str) {
        if !self.log.is_empty() && !self.log.ends_with('\n') {
            self.log.push('\n');
        }
        self.log.push_str("[querydrive] ");
        self.log.push_str(line);
        self.log.push('\n');
        self.touch();
    }

    pub fn is_timeout(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.starts_with(TIMEOUT_MARKER))
    }

    /// Map a terminal record onto the error taxonomy. Non-terminal records
    /// are an internal inconsistency for callers expecting a final answer.
    pub fn outcome(&self) -> Result<()> {
        match self.status {
            ExecutionStatus::Done => Ok(()),
            ExecutionStatus::Cancel => Err(QueryDriveError::Cancelled),
            ExecutionStatus::Error if self.is_timeout() => Err(QueryDriveError::Timeout(
                Duration::from_millis(self.updated_at_ms.saturating_sub(self.created_at_ms)),
            )),
            ExecutionStatus::Error => Err(QueryDriveError::ClientExecution(
                self.error
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string()),
            )),
            status => Err(QueryDriveError::InternalState {
                from: status,
                to: status,
            }),
        }
    }

    fn guard_edge(&self, next: ExecutionStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(QueryDriveError::InternalState {
                from: self.status,
                to: next,
            })
        }
    }

    fn touch(&mut self) {
        self.updated_at_ms = now_ms().max(self.updated_at_ms);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
