use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Canonical status of one query execution.
///
/// `Initialized` is the only start state; `Done`, `Error` and `Cancel` are
/// terminal. The legal edges are:
///
/// ```text
/// INITIALIZED -> RUNNING
/// RUNNING     -> DONE | ERROR | CANCEL
/// INITIALIZED -> CANCEL
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Initialized,
    Running,
    Done,
    Error,
    Cancel,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Done | ExecutionStatus::Error | ExecutionStatus::Cancel
        )
    }

    /// Whether `self -> next` is one of the legal edges.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Initialized, Running)
                | (Running, Done)
                | (Running, Error)
                | (Running, Cancel)
                | (Initialized, Cancel)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Initialized => "INITIALIZED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Done => "DONE",
            ExecutionStatus::Error => "ERROR",
            ExecutionStatus::Cancel => "CANCEL",
        }
    }
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        ExecutionStatus::Initialized
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INITIALIZED" => Ok(ExecutionStatus::Initialized),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "DONE" => Ok(ExecutionStatus::Done),
            "ERROR" => Ok(ExecutionStatus::Error),
            "CANCEL" => Ok(ExecutionStatus::Cancel),
            other => Err(format!("invalid execution status: {other}")),
        }
    }
}

/// Health verdict produced by an engine status checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// How the poll interval evolves between ticks.
///
/// - `Fixed`: every tick waits `poll_interval`.
/// - `Exponential`: the wait doubles after each tick, capped at
///   `max_poll_interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

impl BackoffKind {
    pub fn next_interval(self, current: Duration, max: Duration) -> Duration {
        match self {
            BackoffKind::Fixed => current,
            BackoffKind::Exponential => current.saturating_mul(2).min(max),
        }
    }
}

impl Default for BackoffKind {
    fn default() -> Self {
        BackoffKind::Exponential
    }
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(BackoffKind::Fixed),
            "exponential" => Ok(BackoffKind::Exponential),
            other => Err(format!(
                "invalid backoff: {other} (expected \"fixed\" or \"exponential\")"
            )),
        }
    }
}

/// Where execution records and result sets are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// JSON files under `storage_dir`.
    File,
    /// Process memory only (lost on restart).
    Memory,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::Memory
    }
}
