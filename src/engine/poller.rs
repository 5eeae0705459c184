// src/engine/poller.rs

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::time::{Instant, sleep_until, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::engine::cancel::CancelListener;
use crate::engine::core::{PollCommand, PollCore, PollStep};
use crate::engine::record::{ExecutionRecord, ResultHandle};
use crate::errors::Result;
use crate::exec::EngineClient;
use crate::store::ExecutionStore;
use crate::types::ExecutionStatus;

/// Drives one engine client to a terminal status.
///
/// IO shell around [`PollCore`]: it performs the client calls, clock checks
/// and store writes that the core asks for. The client is owned here and is
/// closed on every exit path, including internal state errors.
///
/// Every client call runs under the current time limit: the execution
/// deadline, or the end of the cancel grace period once that deadline has
/// passed. A call still pending at the limit is dropped and reported to the
/// core as an expired clock.
pub struct Poller {
    core: PollCore,
    client: Box<dyn EngineClient>,
    store: Arc<dyn ExecutionStore>,
    cancel: CancelListener,
    deadline: Instant,
    grace_deadline: Option<Instant>,
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("core", &self.core)
            .field("capabilities", &self.client.capabilities())
            .finish_non_exhaustive()
    }
}

/// How the loop is entered.
enum Start<'q> {
    Fresh { query: &'q str },
    Reattached,
}

impl Poller {
    pub fn new(
        core: PollCore,
        client: Box<dyn EngineClient>,
        store: Arc<dyn ExecutionStore>,
        cancel: CancelListener,
    ) -> Self {
        let deadline = Instant::now() + core.options().timeout;
        Self {
            core,
            client,
            store,
            cancel,
            deadline,
            grace_deadline: None,
        }
    }

    /// Execute `query` and poll until terminal.
    pub async fn run(self, query: &str) -> Result<ExecutionRecord> {
        self.drive(Start::Fresh { query }).await
    }

    /// Poll a client that was reattached to an already running remote job.
    pub async fn run_reattached(self) -> Result<ExecutionRecord> {
        self.drive(Start::Reattached).await
    }

    async fn drive(mut self, start: Start<'_>) -> Result<ExecutionRecord> {
        let record_id = self.core.record().id.clone();
        let engine = self.core.record().engine.clone();
        info!(execution_id = %record_id, engine = %engine, "poller started");

        let outcome = self.poll_loop(start).await;

        let wind_down = self.core.options().cancel_grace;
        if timeout(wind_down, self.client.close()).await.is_err() {
            warn!(execution_id = %record_id, "client close did not finish in time; dropping it");
        }
        match timeout(wind_down, self.client.get_logs()).await {
            Ok(logs) => {
                if self.core.flush_logs(&logs) {
                    self.persist();
                }
            }
            Err(_) => debug!(execution_id = %record_id, "final log read timed out"),
        }

        match outcome {
            Ok(()) => {
                let record = self.core.into_record();
                info!(
                    execution_id = %record_id,
                    engine = %engine,
                    status = %record.status,
                    "poller finished"
                );
                Ok(record)
            }
            Err(err) => {
                warn!(execution_id = %record_id, engine = %engine, error = %err, "poller aborted");
                Err(err)
            }
        }
    }

    async fn poll_loop(&mut self, start: Start<'_>) -> Result<()> {
        let options = *self.core.options();
        self.deadline = Instant::now() + options.timeout;
        self.grace_deadline = None;
        let mut interval = options.interval;

        let (step, query) = match start {
            Start::Fresh { query } => (self.core.begin(self.cancel.is_cancelled())?, query),
            Start::Reattached => (self.core.resume(), ""),
        };
        if !self.apply(step, query).await? {
            return Ok(());
        }

        loop {
            // Status and logs.
            let Some(status) = self.bounded_status().await else {
                let step = self.clock_expired()?;
                if !self.apply(step, query).await? {
                    return Ok(());
                }
                continue;
            };
            let limit = self.call_limit();
            let logs = match timeout_at(limit, self.client.get_logs()).await {
                Ok(logs) => logs,
                Err(_) => {
                    let step = self.clock_expired()?;
                    if !self.apply(step, query).await? {
                        return Ok(());
                    }
                    continue;
                }
            };
            debug!(execution_id = %self.core.record().id, status = %status, "poll tick");

            // A terminal status first seen after the deadline is a timeout.
            if status.is_terminal()
                && Instant::now() >= self.deadline
                && !self.core.deadline_passed()
            {
                self.core.expire();
            }
            let step = self.core.on_observed(status, &logs)?;
            if !self.apply(step, query).await? {
                return Ok(());
            }
            let step = self.core.on_remote_handle(self.client.remote_handle());
            self.apply(step, query).await?;

            // Cancellation flag.
            if self.cancel.is_cancelled() && !self.core.cancel_requested() {
                info!(execution_id = %self.core.record().id, "cancellation requested");
                let step = self.core.on_cancel_requested();
                if !self.apply(step, query).await? {
                    return Ok(());
                }
            }

            // Deadline.
            if Instant::now() >= self.deadline && !self.core.deadline_passed() {
                let step = self.clock_expired()?;
                if !self.apply(step, query).await? {
                    return Ok(());
                }
            }

            // Grace expiry.
            if self.grace_deadline.is_some_and(|g| Instant::now() >= g) {
                let step = self.core.on_grace_expired()?;
                self.apply(step, query).await?;
                return Ok(());
            }

            // Sleep, waking early for a cancellation request or a clock edge.
            let wake = (Instant::now() + interval).min(self.call_limit());
            if self.core.cancel_requested() {
                sleep_until(wake).await;
            } else {
                tokio::select! {
                    _ = sleep_until(wake) => {}
                    _ = self.cancel.cancelled() => {
                        debug!(execution_id = %self.core.record().id, "woken by cancellation");
                    }
                }
            }
            interval = options.backoff.next_interval(interval, options.max_interval);
        }
    }

    /// Deadline for the next client call.
    fn call_limit(&self) -> Instant {
        self.grace_deadline.unwrap_or(self.deadline)
    }

    async fn bounded_status(&mut self) -> Option<ExecutionStatus> {
        let limit = self.call_limit();
        timeout_at(limit, self.client.get_status()).await.ok()
    }

    /// The current time limit was reached: the execution deadline starts the
    /// timeout cancellation, the end of the grace period finishes it.
    fn clock_expired(&mut self) -> Result<PollStep> {
        if self.core.deadline_passed() {
            warn!(execution_id = %self.core.record().id, "cancel grace period expired");
            return self.core.on_grace_expired();
        }
        let options = *self.core.options();
        warn!(
            execution_id = %self.core.record().id,
            timeout = ?options.timeout,
            "execution timed out"
        );
        self.grace_deadline = Some(Instant::now() + options.cancel_grace);
        Ok(self.core.on_deadline())
    }

    /// Run the commands of `step`, feeding client answers back into the
    /// core. Returns whether polling should continue.
    async fn apply(&mut self, step: PollStep, query: &str) -> Result<bool> {
        let mut keep_polling = step.keep_polling;
        let mut queue: VecDeque<PollCommand> = step.commands.into();

        while let Some(command) = queue.pop_front() {
            let follow_up = match command {
                PollCommand::Persist => {
                    self.persist();
                    None
                }
                PollCommand::Execute => {
                    debug!(execution_id = %self.core.record().id, "submitting query to client");
                    let limit = self.call_limit();
                    match timeout_at(limit, self.client.execute(query)).await {
                        Ok(()) => None,
                        Err(_) => Some(self.clock_expired()?),
                    }
                }
                PollCommand::RequestCancel(cause) => {
                    let limit = self.call_limit();
                    match timeout_at(limit, self.client.cancel()).await {
                        Ok(accepted) => {
                            info!(
                                execution_id = %self.core.record().id,
                                ?cause,
                                accepted,
                                "client answered cancellation"
                            );
                            Some(self.core.on_cancel_answered(cause, accepted)?)
                        }
                        Err(_) => Some(self.clock_expired()?),
                    }
                }
                PollCommand::FetchResults => Some(self.fetch_results().await?),
            };

            if let Some(next) = follow_up {
                keep_polling &= next.keep_polling;
                queue.extend(next.commands);
            }
        }
        Ok(keep_polling && !self.core.is_finished())
    }

    async fn fetch_results(&mut self) -> Result<PollStep> {
        let limit = self.call_limit();
        let fetched = match timeout_at(limit, self.client.get_results()).await {
            Ok(fetched) => fetched,
            Err(_) => {
                warn!(execution_id = %self.core.record().id, "result fetch ran past the time limit");
                return self.core.on_timed_out();
            }
        };
        let Some(result) = fetched else {
            return self.core.on_results(None);
        };
        let handle = match ResultHandle::for_result(&result) {
            Ok(handle) => handle,
            Err(err) => return self.core.on_results_unavailable(&err.to_string()),
        };
        if let Err(err) = self.store.save_result(&handle, &result) {
            warn!(
                execution_id = %self.core.record().id,
                error = %format!("{err:#}"),
                "failed to store result set"
            );
            return self.core.on_results_unavailable(&format!("{err:#}"));
        }
        debug!(
            execution_id = %self.core.record().id,
            handle = %handle,
            rows = result.row_count(),
            "result set stored"
        );
        self.core.on_results(Some(handle))
    }

    fn persist(&self) {
        let record = self.core.record();
        if let Err(err) = self.store.save_execution_record(record) {
            warn!(
                execution_id = %record.id,
                status = %record.status,
                error = %format!("{err:#}"),
                "failed to persist execution record; continuing"
            );
        }
    }
}

