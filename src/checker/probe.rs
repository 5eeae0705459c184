// src/checker/probe.rs

use tracing::{debug, warn};

use crate::checker::{CheckReport, ProbeOptions};
use crate::exec::backend::last_log_line;
use crate::exec::{EngineClient, ExecutorParams, ExecutorSpec, QueryResult};
use crate::types::ExecutionStatus;

/// What a bounded probe execution observed.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// The client could not be constructed.
    Unavailable(String),
    /// Last observed status, logs and (when DONE) the result.
    Finished {
        status: ExecutionStatus,
        logs: String,
        result: Option<QueryResult>,
        ticks: u32,
    },
    /// Still not terminal after the tick budget; the probe was cancelled.
    StillRunning { ticks: u32 },
}

impl ProbeOutcome {
    pub fn result(&self) -> Option<&QueryResult> {
        match self {
            ProbeOutcome::Finished { result, .. } => result.as_ref(),
            _ => None,
        }
    }

    pub fn into_report(self, engine: &str) -> CheckReport {
        match self {
            ProbeOutcome::Unavailable(err) => {
                CheckReport::error(format!("cannot create a client for '{engine}': {err}"))
            }
            ProbeOutcome::StillRunning { ticks } => CheckReport::warn(format!(
                "probe on '{engine}' did not finish within {ticks} poll ticks"
            )),
            ProbeOutcome::Finished {
                status: ExecutionStatus::Done,
                ticks,
                ..
            } => CheckReport::ok(format!("'{engine}' answered the probe after {ticks} poll ticks")),
            ProbeOutcome::Finished { status, logs, .. } => {
                let report = CheckReport::error(format!("probe on '{engine}' ended in {status}"));
                match last_log_line(&logs) {
                    Some(line) => report.with_message(line.to_string()),
                    None => report,
                }
            }
        }
    }
}

/// Run `query` on a throwaway client for at most `options.max_ticks` polls.
/// The client is closed on every path.
pub async fn run_probe(
    spec: &ExecutorSpec,
    params: &ExecutorParams,
    query: &str,
    options: ProbeOptions,
) -> ProbeOutcome {
    let mut client = match spec.create_client(params) {
        Ok(client) => client,
        Err(err) => {
            warn!(executor = %spec.name(), error = %err, "probe client construction failed");
            return ProbeOutcome::Unavailable(err.to_string());
        }
    };

    let outcome = drive_probe(client.as_mut(), query, options).await;
    client.close().await;
    debug!(executor = %spec.name(), ?outcome, "probe finished");
    outcome
}

async fn drive_probe(
    client: &mut dyn EngineClient,
    query: &str,
    options: ProbeOptions,
) -> ProbeOutcome {
    client.execute(query).await;

    let mut ticks = 0;
    loop {
        ticks += 1;
        let status = client.get_status().await;
        if status.is_terminal() {
            let logs = client.get_logs().await;
            let result = if status == ExecutionStatus::Done {
                client.get_results().await
            } else {
                None
            };
            return ProbeOutcome::Finished {
                status,
                logs,
                result,
                ticks,
            };
        }
        if ticks >= options.max_ticks {
            let accepted = client.cancel().await;
            debug!(accepted, "cancelled unfinished probe");
            return ProbeOutcome::StillRunning { ticks };
        }
        tokio::time::sleep(options.interval).await;
    }
}
