// src/engine/core.rs

//! Pure poll core.
//!
//! [`PollCore`] owns the [`ExecutionRecord`] of one execution and reacts to
//! observations made by the async shell ([`crate::engine::Poller`]):
//! - it updates the record through the state machine
//! - it returns [`PollCommand`]s describing what the shell must do next
//!
//! No Tokio, no clients, no clocks: deadlines are detected by the shell and
//! reported here as events, which keeps every decision unit-testable.

use crate::engine::record::{ExecutionRecord, ResultHandle};
use crate::errors::Result;
use crate::exec::backend::last_log_line;
use crate::types::ExecutionStatus;

use super::PollOptions;

/// Why the shell is asked to call `cancel()` on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The submitting side asked for cancellation.
    User,
    /// The execution ran past its timeout.
    Timeout,
}

/// Side effects requested by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollCommand {
    /// Hand the current record to the store.
    Persist,
    /// Call `execute(query)` on the client.
    Execute,
    /// Call `cancel()` and report back through [`PollCore::on_cancel_answered`].
    RequestCancel(CancelCause),
    /// Fetch and store the result set, then report through
    /// [`PollCore::on_results`] or [`PollCore::on_results_unavailable`].
    FetchResults,
}

/// Result of feeding one event into the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStep {
    pub commands: Vec<PollCommand>,
    /// `false` once the record is terminal.
    pub keep_polling: bool,
}

impl PollStep {
    fn idle() -> Self {
        Self {
            commands: Vec::new(),
            keep_polling: true,
        }
    }

    fn with(commands: Vec<PollCommand>) -> Self {
        Self {
            commands,
            keep_polling: true,
        }
    }

    fn finished() -> Self {
        Self {
            commands: vec![PollCommand::Persist],
            keep_polling: false,
        }
    }
}

#[derive(Debug)]
pub struct PollCore {
    record: ExecutionRecord,
    options: PollOptions,
    /// Length of the client log already copied into the record.
    seen_log_len: usize,
    deadline_passed: bool,
    awaiting_results: bool,
}

impl PollCore {
    pub fn new(record: ExecutionRecord, options: PollOptions) -> Self {
        Self {
            record,
            options,
            seen_log_len: 0,
            deadline_passed: false,
            awaiting_results: false,
        }
    }

    pub fn record(&self) -> &ExecutionRecord {
        &self.record
    }

    pub fn into_record(self) -> ExecutionRecord {
        self.record
    }

    pub fn options(&self) -> &PollOptions {
        &self.options
    }

    pub fn is_finished(&self) -> bool {
        self.record.is_terminal()
    }

    pub fn cancel_requested(&self) -> bool {
        self.record.cancel_requested
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline_passed
    }

    /// First event for a fresh execution. A cancellation that arrived before
    /// the worker picked the request up is offered to the client before
    /// anything is executed.
    pub fn begin(&mut self, cancel_requested: bool) -> Result<PollStep> {
        if cancel_requested {
            self.record.cancel_requested = true;
            return Ok(PollStep::with(vec![
                PollCommand::Persist,
                PollCommand::RequestCancel(CancelCause::User),
            ]));
        }
        self.start()
    }

    /// First event for an execution resumed on a reattached client.
    pub fn resume(&mut self) -> PollStep {
        self.record.note("resumed polling after worker restart");
        PollStep::with(vec![PollCommand::Persist])
    }

    fn start(&mut self) -> Result<PollStep> {
        self.record.transition(ExecutionStatus::Running)?;
        Ok(PollStep::with(vec![PollCommand::Persist, PollCommand::Execute]))
    }

    /// One status + log observation.
    pub fn on_observed(&mut self, status: ExecutionStatus, logs: &str) -> Result<PollStep> {
        if self.is_finished() {
            return Ok(PollStep {
                commands: Vec::new(),
                keep_polling: false,
            });
        }
        let grew = self.absorb_logs(logs);

        let step = match status {
            ExecutionStatus::Initialized | ExecutionStatus::Running => {
                if grew {
                    PollStep::with(vec![PollCommand::Persist])
                } else {
                    PollStep::idle()
                }
            }
            _ if self.deadline_passed => {
                self.record.fail_timeout(self.options.timeout)?;
                PollStep::finished()
            }
            ExecutionStatus::Done => {
                if self.awaiting_results {
                    PollStep::idle()
                } else {
                    self.awaiting_results = true;
                    PollStep::with(vec![PollCommand::FetchResults])
                }
            }
            ExecutionStatus::Error => {
                let message = last_log_line(logs)
                    .unwrap_or("execution failed without log output")
                    .to_string();
                self.record.fail(message)?;
                PollStep::finished()
            }
            ExecutionStatus::Cancel => {
                self.record.transition(ExecutionStatus::Cancel)?;
                PollStep::finished()
            }
        };
        Ok(step)
    }

    /// Copy log text the record has not seen yet. A client log that shrank
    /// is ignored so the record only ever grows by appending. When a rewritten
    /// log puts the seen offset inside a character, copying resumes at the
    /// next character boundary.
    fn absorb_logs(&mut self, logs: &str) -> bool {
        if logs.len() <= self.seen_log_len {
            return false;
        }
        let mut start = self.seen_log_len;
        while !logs.is_char_boundary(start) {
            start += 1;
        }
        let Some(fresh) = logs.get(start..) else {
            return false;
        };
        self.record.append_log(fresh);
        self.seen_log_len = logs.len();
        true
    }

    /// Last log read after the client was closed. Allowed on terminal records.
    pub fn flush_logs(&mut self, logs: &str) -> bool {
        self.absorb_logs(logs)
    }

    pub fn on_remote_handle(&mut self, handle: Option<String>) -> PollStep {
        if handle.is_none() || handle == self.record.remote_handle || self.is_finished() {
            return PollStep::idle();
        }
        self.record.remote_handle = handle;
        PollStep::with(vec![PollCommand::Persist])
    }

    pub fn on_cancel_requested(&mut self) -> PollStep {
        if self.record.cancel_requested || self.is_finished() {
            return PollStep::idle();
        }
        self.record.cancel_requested = true;
        PollStep::with(vec![
            PollCommand::Persist,
            PollCommand::RequestCancel(CancelCause::User),
        ])
    }

    pub fn on_cancel_answered(&mut self, cause: CancelCause, accepted: bool) -> Result<PollStep> {
        if self.is_finished() {
            return Ok(PollStep {
                commands: Vec::new(),
                keep_polling: false,
            });
        }
        match (cause, accepted) {
            (CancelCause::User, true) => {
                self.record.note("cancellation accepted");
                self.record.transition(ExecutionStatus::Cancel)?;
                Ok(PollStep::finished())
            }
            (CancelCause::User, false) => {
                self.record.cancel_unsupported = true;
                self.record
                    .note("cancellation not supported by this engine; waiting for the query to finish");
                if self.record.status == ExecutionStatus::Initialized {
                    let mut step = self.start()?;
                    step.commands.insert(0, PollCommand::Persist);
                    return Ok(step);
                }
                Ok(PollStep::with(vec![PollCommand::Persist]))
            }
            (CancelCause::Timeout, true) => {
                self.finish_timed_out()?;
                Ok(PollStep::finished())
            }
            (CancelCause::Timeout, false) => {
                self.record.note(&format!(
                    "engine refused cancellation; giving it {} to stop",
                    crate::config::duration::format_duration(self.options.cancel_grace)
                ));
                Ok(PollStep::with(vec![PollCommand::Persist]))
            }
        }
    }

    /// Mark the deadline as passed without asking for cancellation. Used when
    /// the first observation after the deadline is already terminal; the
    /// following [`PollCore::on_observed`] then records a timeout.
    pub fn expire(&mut self) {
        if self.deadline_passed || self.is_finished() {
            return;
        }
        self.deadline_passed = true;
        self.record.timed_out = true;
        self.record.note(&format!(
            "execution exceeded {}",
            crate::config::duration::format_duration(self.options.timeout)
        ));
    }

    /// The wall-clock timeout expired.
    pub fn on_deadline(&mut self) -> PollStep {
        if self.deadline_passed || self.is_finished() {
            return PollStep::idle();
        }
        self.expire();
        self.record.note("requesting cancellation after timeout");
        PollStep::with(vec![
            PollCommand::Persist,
            PollCommand::RequestCancel(CancelCause::Timeout),
        ])
    }

    /// The grace period after the deadline expired without a terminal status.
    pub fn on_grace_expired(&mut self) -> Result<PollStep> {
        self.on_timed_out()
    }

    /// Fail with the timeout marker right away, e.g. when fetching results
    /// ran into the deadline.
    pub fn on_timed_out(&mut self) -> Result<PollStep> {
        if self.is_finished() {
            return Ok(PollStep {
                commands: Vec::new(),
                keep_polling: false,
            });
        }
        self.expire();
        self.finish_timed_out()?;
        Ok(PollStep::finished())
    }

    /// Terminal timeout status. A query that never left INITIALIZED cannot
    /// become ERROR, so it is cancelled instead and keeps `timed_out`.
    fn finish_timed_out(&mut self) -> Result<()> {
        if self.record.status == ExecutionStatus::Initialized {
            self.record.timed_out = true;
            self.record.note("timed out before the query was submitted");
            self.record.transition(ExecutionStatus::Cancel)?;
            return Ok(());
        }
        self.record.fail_timeout(self.options.timeout)
    }

    /// The result set (if any) has been stored under `handle`.
    pub fn on_results(&mut self, handle: Option<ResultHandle>) -> Result<PollStep> {
        self.awaiting_results = false;
        if handle.is_none() {
            self.record.note("engine reported success without a result set");
        }
        self.record.complete(handle)?;
        Ok(PollStep::finished())
    }

    /// The result set could not be fetched or stored. A DONE record must
    /// reference a complete result, so the execution fails instead.
    pub fn on_results_unavailable(&mut self, reason: &str) -> Result<PollStep> {
        self.awaiting_results = false;
        self.record.fail(format!("result set unavailable: {reason}"))?;
        Ok(PollStep::finished())
    }
}
