// src/errors.rs

//! Crate-wide error taxonomy.

use std::time::Duration;

use thiserror::Error;

use crate::types::ExecutionStatus;

#[derive(Error, Debug)]
pub enum QueryDriveError {
    /// Malformed configuration or executor parameters. The execution never
    /// starts.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// `(language, executor)` pair missing from the executor registry.
    #[error("Unsupported engine: language '{language}' with executor '{executor}' is not registered")]
    UnsupportedEngine { language: String, executor: String },

    /// Backend-reported failure captured from an ERROR execution.
    #[error("Client execution error: {0}")]
    ClientExecution(String),

    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    /// User-requested cancellation. Not a failure, but not a result either.
    #[error("Execution cancelled")]
    Cancelled,

    /// An illegal status transition was attempted. Indicates a defect.
    #[error("Illegal status transition {from} -> {to}")]
    InternalState {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QueryDriveError {
    /// Configuration errors are surfaced before any state transition.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            QueryDriveError::ConfigError(_) | QueryDriveError::UnsupportedEngine { .. }
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, QueryDriveError>;
