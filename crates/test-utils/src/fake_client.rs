use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use querydrive::exec::{
    BoxFuture, ClientCapabilities, EngineClient, ExecutorParams, ExecutorSpec, QueryResult,
};
use querydrive::types::ExecutionStatus;

/// Observable side of a `FakeClient` that has been boxed and handed to the
/// poller.
#[derive(Debug, Clone, Default)]
pub struct FakeProbe {
    inner: Arc<Mutex<FakeCounters>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeCounters {
    pub executed: Vec<String>,
    pub status_calls: usize,
    pub cancel_calls: usize,
    pub close_calls: usize,
    pub reattached: Vec<String>,
}

impl FakeProbe {
    pub fn counters(&self) -> FakeCounters {
        self.inner.lock().unwrap().clone()
    }

    fn update(&self, f: impl FnOnce(&mut FakeCounters)) {
        f(&mut self.inner.lock().unwrap());
    }
}

#[derive(Debug, Clone)]
enum LogChange {
    Keep,
    Append(String),
    Replace(String),
}

#[derive(Debug, Clone)]
struct Tick {
    status: ExecutionStatus,
    log: LogChange,
}

/// Scripted engine client.
///
/// After `execute`, each `get_status` call consumes one scripted tick; once
/// the script is exhausted the client stays in `steady` (RUNNING unless
/// changed). `cancel` succeeds only when `accept_cancel` is set.
#[derive(Debug, Clone)]
pub struct FakeClient {
    status: ExecutionStatus,
    ticks: VecDeque<Tick>,
    steady: ExecutionStatus,
    log: String,
    accept_cancel: bool,
    result: Option<QueryResult>,
    capabilities: ClientCapabilities,
    remote_handle: Option<String>,
    sync_outcome: Option<ExecutionStatus>,
    hang_while_running: bool,
    probe: FakeProbe,
}

impl Default for FakeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            status: ExecutionStatus::Initialized,
            ticks: VecDeque::new(),
            steady: ExecutionStatus::Running,
            log: String::new(),
            accept_cancel: false,
            result: Some(QueryResult::from_lines(["1"])),
            capabilities: ClientCapabilities::default(),
            remote_handle: None,
            sync_outcome: None,
            hang_while_running: false,
            probe: FakeProbe::default(),
        }
    }

    /// Next tick reports `status` without new log output.
    pub fn then(mut self, status: ExecutionStatus) -> Self {
        self.ticks.push_back(Tick {
            status,
            log: LogChange::Keep,
        });
        self
    }

    /// Next tick appends `line` to the log and reports `status`.
    pub fn then_log(mut self, status: ExecutionStatus, line: &str) -> Self {
        self.ticks.push_back(Tick {
            status,
            log: LogChange::Append(format!("{line}\n")),
        });
        self
    }

    /// Next tick replaces the whole log with `text` (which may be shorter).
    pub fn then_replace_log(mut self, status: ExecutionStatus, text: &str) -> Self {
        self.ticks.push_back(Tick {
            status,
            log: LogChange::Replace(text.to_string()),
        });
        self
    }

    /// Status once the script has run out.
    pub fn steady(mut self, status: ExecutionStatus) -> Self {
        self.steady = status;
        self
    }

    pub fn accept_cancel(mut self, accept: bool) -> Self {
        self.accept_cancel = accept;
        self.capabilities.supports_cancellation = accept;
        self
    }

    pub fn with_result(mut self, result: Option<QueryResult>) -> Self {
        self.result = result;
        self
    }

    pub fn with_remote_handle(mut self, handle: &str) -> Self {
        self.remote_handle = Some(handle.to_string());
        self
    }

    pub fn reattachable(mut self) -> Self {
        self.capabilities.supports_reattach = true;
        self
    }

    /// `execute` finishes with `outcome` before returning.
    pub fn synchronous(mut self, outcome: ExecutionStatus, log: &str) -> Self {
        self.capabilities.synchronous = true;
        self.sync_outcome = Some(outcome);
        self.log.push_str(log);
        self
    }

    /// `get_status` never resolves while the job is RUNNING, like a backend
    /// whose status endpoint stopped answering.
    pub fn hang_while_running(mut self) -> Self {
        self.hang_while_running = true;
        self
    }

    pub fn probe(&self) -> FakeProbe {
        self.probe.clone()
    }
}

impl EngineClient for FakeClient {
    fn capabilities(&self) -> ClientCapabilities {
        self.capabilities
    }

    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.probe.update(|c| c.executed.push(query.to_string()));
            if self.status != ExecutionStatus::Initialized {
                return;
            }
            self.status = self.sync_outcome.unwrap_or(ExecutionStatus::Running);
        })
    }

    fn get_status(&mut self) -> BoxFuture<'_, ExecutionStatus> {
        self.probe.update(|c| c.status_calls += 1);
        if self.hang_while_running && self.status == ExecutionStatus::Running {
            return Box::pin(std::future::pending());
        }
        if self.status == ExecutionStatus::Running {
            match self.ticks.pop_front() {
                Some(tick) => {
                    match tick.log {
                        LogChange::Keep => {}
                        LogChange::Append(chunk) => self.log.push_str(&chunk),
                        LogChange::Replace(text) => self.log = text,
                    }
                    self.status = tick.status;
                }
                None => self.status = self.steady,
            }
        }
        let status = self.status;
        Box::pin(async move { status })
    }

    fn get_logs(&mut self) -> BoxFuture<'_, String> {
        let log = self.log.clone();
        Box::pin(async move { log })
    }

    fn get_results(&mut self) -> BoxFuture<'_, Option<QueryResult>> {
        let result = match self.status {
            ExecutionStatus::Done => self.result.clone(),
            _ => None,
        };
        Box::pin(async move { result })
    }

    fn cancel(&mut self) -> BoxFuture<'_, bool> {
        self.probe.update(|c| c.cancel_calls += 1);
        let accepted = self.accept_cancel && !self.status.is_terminal();
        if accepted {
            self.status = ExecutionStatus::Cancel;
        }
        Box::pin(async move { accepted })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        self.probe.update(|c| c.close_calls += 1);
        Box::pin(async {})
    }

    fn remote_handle(&self) -> Option<String> {
        match self.status {
            ExecutionStatus::Running => self.remote_handle.clone(),
            _ => None,
        }
    }

    fn reattach<'a>(&'a mut self, handle: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if !self.capabilities.supports_reattach || self.status != ExecutionStatus::Initialized {
                return false;
            }
            self.probe.update(|c| c.reattached.push(handle.to_string()));
            self.status = ExecutionStatus::Running;
            true
        })
    }
}

/// Executor spec whose clients are clones of `template`. Every clone shares
/// the template's probe. It claims SQL support so every checker applies.
pub fn fake_executor_spec(language: &str, name: &str, template: FakeClient) -> ExecutorSpec {
    ExecutorSpec::new(language, name, "probe", move |_params: &ExecutorParams| {
        let client: Box<dyn EngineClient> = Box::new(template.clone());
        Ok(client)
    })
    .speaks_sql()
}
