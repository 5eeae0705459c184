// src/engine/mod.rs

//! Execution engine.
//!
//! This module ties together:
//! - the execution record and its status state machine ([`record`])
//! - the pure poll core that decides what happens on each observation
//! - the async poller that drives one engine client
//! - the execution service: worker pool, entry point and crash recovery
//!
//! The pure state lives in [`core`]; the async/IO shell is implemented in
//! [`poller`].

use std::time::Duration;

use crate::types::BackoffKind;

/// Effective polling settings for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Wait before the first re-poll.
    pub interval: Duration,
    pub max_interval: Duration,
    pub backoff: BackoffKind,
    /// Wall-clock ceiling for the whole execution.
    pub timeout: Duration,
    /// Time a timed-out client gets to reach a terminal status.
    pub cancel_grace: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        crate::config::ConfigSection::default()
            .poll_options_for(&crate::config::FeatureParams::default())
    }
}

pub mod cancel;
pub mod core;
pub mod poller;
pub mod record;
pub mod service;

pub use cancel::{CancelHandle, CancelListener, cancel_pair};
pub use core::{CancelCause, PollCommand, PollCore, PollStep};
pub use poller::Poller;
pub use record::{
    ExecutionId, ExecutionRecord, ExecutionRequest, ResultHandle, TIMEOUT_MARKER,
    WORKER_LOST_MARKER,
};
pub use service::{ExecutionHandle, ExecutionService};
