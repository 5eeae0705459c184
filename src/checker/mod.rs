// src/checker/mod.rs

//! Engine status checkers.
//!
//! A checker verifies that a configured backend is reachable without any
//! user query. Probe executions reuse the client factory, run a backend
//! specific probe query for a bounded number of poll ticks and always close
//! the probe client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::EngineDescriptor;
use crate::errors::{QueryDriveError, Result};
use crate::exec::{BoxFuture, ExecutorParams, ExecutorSpec};
use crate::types::CheckStatus;

mod probe;
mod service;

pub use probe::{ProbeOutcome, run_probe};
pub use service::EngineStatusService;

pub const NULL_CHECKER: &str = "null";
pub const CONNECTION_CHECKER: &str = "connection";
pub const SELECT_ONE_CHECKER: &str = "select_one";

/// Bounds for one probe execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    pub max_ticks: u32,
    pub interval: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            max_ticks: 10,
            interval: Duration::from_millis(500),
        }
    }
}

/// Verdict plus human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub status: CheckStatus,
    pub messages: Vec<String>,
}

impl CheckReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::single(CheckStatus::Ok, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::single(CheckStatus::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::single(CheckStatus::Error, message)
    }

    fn single(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            messages: vec![message.into()],
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }
}

pub trait EngineStatusChecker: Send + Sync {
    fn name(&self) -> &'static str;

    /// The checker submits its own SQL and only works on SQL executors.
    fn requires_sql(&self) -> bool {
        false
    }

    fn perform_check_with_executor<'a>(
        &'a self,
        executor: &'a ExecutorSpec,
        executor_params: &'a ExecutorParams,
        engine: &'a EngineDescriptor,
        options: ProbeOptions,
    ) -> BoxFuture<'a, CheckReport>;
}

/// Always healthy. Default for engines without a configured checker.
#[derive(Debug, Default)]
pub struct NullChecker;

impl EngineStatusChecker for NullChecker {
    fn name(&self) -> &'static str {
        NULL_CHECKER
    }

    fn perform_check_with_executor<'a>(
        &'a self,
        _executor: &'a ExecutorSpec,
        _executor_params: &'a ExecutorParams,
        engine: &'a EngineDescriptor,
        _options: ProbeOptions,
    ) -> BoxFuture<'a, CheckReport> {
        let report = CheckReport::ok(format!("no status check configured for '{}'", engine.name));
        Box::pin(async move { report })
    }
}

/// Runs the executor's own probe query.
#[derive(Debug, Default)]
pub struct ConnectionChecker;

impl EngineStatusChecker for ConnectionChecker {
    fn name(&self) -> &'static str {
        CONNECTION_CHECKER
    }

    fn perform_check_with_executor<'a>(
        &'a self,
        executor: &'a ExecutorSpec,
        executor_params: &'a ExecutorParams,
        engine: &'a EngineDescriptor,
        options: ProbeOptions,
    ) -> BoxFuture<'a, CheckReport> {
        Box::pin(async move {
            let outcome =
                run_probe(executor, executor_params, executor.probe_query(), options).await;
            outcome.into_report(&engine.name)
        })
    }
}

/// Runs `SELECT 1` and additionally expects a row back.
#[derive(Debug, Default)]
pub struct SelectOneChecker;

impl EngineStatusChecker for SelectOneChecker {
    fn name(&self) -> &'static str {
        SELECT_ONE_CHECKER
    }

    fn requires_sql(&self) -> bool {
        true
    }

    fn perform_check_with_executor<'a>(
        &'a self,
        executor: &'a ExecutorSpec,
        executor_params: &'a ExecutorParams,
        engine: &'a EngineDescriptor,
        options: ProbeOptions,
    ) -> BoxFuture<'a, CheckReport> {
        Box::pin(async move {
            let outcome = run_probe(executor, executor_params, "SELECT 1", options).await;
            let empty = outcome.result().is_none_or(|r| r.is_empty());
            let report = outcome.into_report(&engine.name);
            if report.status == CheckStatus::Ok && empty {
                return CheckReport {
                    status: CheckStatus::Warn,
                    messages: report.messages,
                }
                .with_message("probe returned no rows");
            }
            report
        })
    }
}

/// Reject checker/executor pairs that can never produce a useful report,
/// such as `select_one` on a shell engine.
pub fn ensure_compatible(checker: &dyn EngineStatusChecker, executor: &ExecutorSpec) -> Result<()> {
    if checker.requires_sql() && !executor.accepts_sql() {
        return Err(QueryDriveError::ConfigError(format!(
            "status checker '{}' needs a SQL executor, but '{}/{}' does not take SQL",
            checker.name(),
            executor.language(),
            executor.name()
        )));
    }
    Ok(())
}

/// Read-only lookup of checkers by name.
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    checkers: Vec<Arc<dyn EngineStatusChecker>>,
}

impl fmt::Debug for CheckerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl CheckerRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(NullChecker));
        registry.register(Arc::new(ConnectionChecker));
        registry.register(Arc::new(SelectOneChecker));
        registry
    }

    /// Later registrations replace earlier ones with the same name.
    pub fn register(&mut self, checker: Arc<dyn EngineStatusChecker>) {
        self.checkers.retain(|c| c.name() != checker.name());
        self.checkers.push(checker);
    }

    pub fn get_engine_checker_class(&self, name: &str) -> Result<Arc<dyn EngineStatusChecker>> {
        self.checkers
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| QueryDriveError::ConfigError(format!("unknown status checker '{name}'")))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.checkers.iter().map(|c| c.name()).collect()
    }
}
