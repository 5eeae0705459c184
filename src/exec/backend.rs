// src/exec/backend.rs

//! Uniform engine client contract.
//!
//! Every backend adapter implements [`EngineClient`]. The poller talks to a
//! `Box<dyn EngineClient>` produced by the factory, so variants can be
//! swapped for a fake client in tests without touching the polling loop.
//!
//! Futures are boxed by hand to keep the trait object safe.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ExecutionStatus;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a client variant can do beyond the mandatory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientCapabilities {
    /// `cancel()` can interrupt work that is already running.
    pub supports_cancellation: bool,
    /// A fresh client can pick up a running remote job from
    /// [`EngineClient::remote_handle`].
    pub supports_reattach: bool,
    /// `execute()` only returns once the query is terminal.
    pub synchronous: bool,
}

/// A complete result set. Clients only hand one out once DONE.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// One `output` column with one row per line.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: vec!["output".to_string()],
            rows: lines
                .into_iter()
                .map(|l| vec![Value::String(l.into())])
                .collect(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Contract implemented by every backend variant.
///
/// A client instance belongs to exactly one execution attempt and is only
/// ever driven by one worker, hence `&mut self` everywhere.
///
/// None of the operations return errors: failures inside `execute` are
/// captured into the log and reflected as [`ExecutionStatus::Error`].
pub trait EngineClient: Send {
    fn capabilities(&self) -> ClientCapabilities;

    /// Begin execution. Sets RUNNING before doing any work. Synchronous
    /// clients reach a terminal status before the future resolves.
    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, ()>;

    /// Current status snapshot. Remote clients may perform one round trip.
    fn get_status(&mut self) -> BoxFuture<'_, ExecutionStatus>;

    /// Log text accumulated so far. Never waits for completion.
    fn get_logs(&mut self) -> BoxFuture<'_, String>;

    /// The result set once DONE; `None` while running or after a failure.
    fn get_results(&mut self) -> BoxFuture<'_, Option<QueryResult>>;

    /// Request cancellation. Returns whether it was accepted; variants that
    /// cannot interrupt running work return `false`.
    fn cancel(&mut self) -> BoxFuture<'_, bool>;

    /// Release sessions, processes and buffers. Idempotent.
    fn close(&mut self) -> BoxFuture<'_, ()>;

    /// Opaque token a replacement worker can use to find the remote job.
    fn remote_handle(&self) -> Option<String> {
        None
    }

    /// Attach to a job started by a previous worker. Returns `false` when the
    /// variant cannot reattach.
    fn reattach<'a>(&'a mut self, _handle: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }
}

/// Last non-empty line of a log, used as the error message for ERROR
/// executions.
pub fn last_log_line(logs: &str) -> Option<&str> {
    logs.lines().rev().map(str::trim).find(|l| !l.is_empty())
}
