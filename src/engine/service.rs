// src/engine/service.rs

use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{ConfigFile, EngineDescriptor};
use crate::engine::cancel::{CancelHandle, CancelListener, cancel_pair};
use crate::engine::core::PollCore;
use crate::engine::poller::Poller;
use crate::engine::record::{
    ExecutionId, ExecutionRecord, ExecutionRequest, ResultHandle, WORKER_LOST_MARKER,
};
use crate::engine::PollOptions;
use crate::errors::{QueryDriveError, Result};
use crate::exec::{EngineClient, ExecutorRegistry, QueryResult};
use crate::store::ExecutionStore;
use crate::types::ExecutionStatus;

/// Entry point for running executions.
///
/// Cheap to clone; every clone shares the registry, store and worker pool.
#[derive(Clone)]
pub struct ExecutionService {
    config: Arc<ConfigFile>,
    executors: Arc<ExecutorRegistry>,
    store: Arc<dyn ExecutionStore>,
    permits: Arc<Semaphore>,
}

impl fmt::Debug for ExecutionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionService")
            .field("engines", &self.config.engines.keys().collect::<Vec<_>>())
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

/// A submitted execution running on the worker pool.
#[derive(Debug)]
pub struct ExecutionHandle {
    id: ExecutionId,
    cancel: CancelHandle,
    task: JoinHandle<Result<ExecutionRecord>>,
}

impl ExecutionHandle {
    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    /// Cloneable trigger for cancelling this execution from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal record. A panicking execution task surfaces as
    /// an error here instead of unwinding into the caller.
    pub async fn wait(self) -> Result<ExecutionRecord> {
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => {
                error!(execution_id = %self.id, error = %join_err, "execution task failed");
                Err(QueryDriveError::Other(anyhow!(
                    "execution task for {} failed: {join_err}",
                    self.id
                )))
            }
        }
    }
}

impl ExecutionService {
    pub fn new(
        config: Arc<ConfigFile>,
        executors: Arc<ExecutorRegistry>,
        store: Arc<dyn ExecutionStore>,
    ) -> Self {
        let workers = config.config.max_concurrent_executions.max(1);
        Self {
            config,
            executors,
            store,
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn engine(&self, name: &str) -> Result<&EngineDescriptor> {
        self.config
            .engine(name)
            .ok_or_else(|| QueryDriveError::ConfigError(format!("unknown engine '{name}'")))
    }

    pub fn poll_options(&self, engine: &EngineDescriptor) -> PollOptions {
        self.config.config.poll_options_for(&engine.feature_params)
    }

    pub fn load_record(&self, id: &ExecutionId) -> Result<ExecutionRecord> {
        self.store
            .load_execution_record(id)?
            .ok_or_else(|| QueryDriveError::ExecutionNotFound(id.to_string()))
    }

    pub fn load_result(&self, handle: &ResultHandle) -> Result<Option<QueryResult>> {
        Ok(self.store.load_result(handle)?)
    }

    /// Resolve the engine and construct a fresh client. Every configuration
    /// problem surfaces here, before a record exists.
    fn build_client(
        &self,
        engine: &EngineDescriptor,
        overrides: &crate::exec::ExecutorParams,
    ) -> Result<Box<dyn EngineClient>> {
        let spec = self
            .executors
            .get_executor_class(&engine.language, &engine.executor)?;
        let params = engine.executor_params.merged_with(overrides);
        spec.create_client(&params)
    }

    /// Run one execution to a terminal status on the current task.
    ///
    /// Configuration errors are returned before any record is persisted.
    /// Every other outcome, including cancellation and timeout, is a terminal
    /// record; only internal state violations come back as errors.
    pub async fn run_execution(
        &self,
        request: &ExecutionRequest,
        cancel: CancelListener,
    ) -> Result<ExecutionRecord> {
        let engine = self.engine(&request.engine)?.clone();
        let client = self.build_client(&engine, &request.executor_params)?;
        let options = self.poll_options(&engine);

        let record = ExecutionRecord::for_request(request);
        debug!(
            execution_id = %record.id,
            engine = %engine.name,
            language = %engine.language,
            executor = %engine.executor,
            principal = %request.principal,
            "execution accepted"
        );

        let core = PollCore::new(record, options);
        let poller = Poller::new(core, client, Arc::clone(&self.store), cancel);
        poller.run(&request.query).await
    }

    /// Dispatch `request` onto the worker pool. At most
    /// `max_concurrent_executions` run at once; the rest wait for a permit.
    pub fn submit(&self, request: ExecutionRequest) -> ExecutionHandle {
        let (cancel, listener) = cancel_pair();
        let id = request.id.clone();
        let service = self.clone();
        let span = info_span!("execution", execution_id = %id, engine = %request.engine);

        let task = tokio::spawn(
            async move {
                let _permit = service
                    .permits
                    .acquire()
                    .await
                    .map_err(|e| QueryDriveError::Other(anyhow!("worker pool closed: {e}")))?;
                service.run_execution(&request, listener).await
            }
            .instrument(span),
        );

        ExecutionHandle { id, cancel, task }
    }

    /// Pick up an execution left behind by a worker that went away.
    ///
    /// - terminal: returned unchanged
    /// - RUNNING on a reattach-capable client with a remote handle: polled
    ///   to completion
    /// - RUNNING otherwise: ERROR with [`WORKER_LOST_MARKER`]
    /// - INITIALIZED: CANCEL, the query never reached the engine
    pub async fn resume_execution(&self, id: &ExecutionId) -> Result<ExecutionRecord> {
        let mut record = self.load_record(id)?;

        match record.status {
            status if status.is_terminal() => {
                debug!(execution_id = %id, status = %status, "execution already terminal");
                Ok(record)
            }
            ExecutionStatus::Initialized => {
                record.note("worker stopped before the query was submitted");
                record.transition(ExecutionStatus::Cancel)?;
                self.persist(&record);
                Ok(record)
            }
            _ => self.resume_running(record).await,
        }
    }

    async fn resume_running(&self, mut record: ExecutionRecord) -> Result<ExecutionRecord> {
        let Some(handle) = record.remote_handle.clone() else {
            return self.mark_lost(record, "no remote handle was recorded");
        };
        let engine = match self.engine(&record.engine) {
            Ok(engine) => engine.clone(),
            Err(err) => return self.mark_lost(record, &err.to_string()),
        };
        let mut client = match self.build_client(&engine, &Default::default()) {
            Ok(client) => client,
            Err(err) => return self.mark_lost(record, &err.to_string()),
        };
        if !client.capabilities().supports_reattach {
            client.close().await;
            return self.mark_lost(record, "engine client cannot reattach");
        }
        if !client.reattach(&handle).await {
            client.close().await;
            return self.mark_lost(record, "remote job could not be reattached");
        }

        info!(execution_id = %record.id, engine = %engine.name, "reattached to running execution");
        let options = self.poll_options(&engine);
        let core = PollCore::new(record, options);
        Poller::new(core, client, Arc::clone(&self.store), CancelListener::never())
            .run_reattached()
            .await
    }

    fn mark_lost(&self, mut record: ExecutionRecord, reason: &str) -> Result<ExecutionRecord> {
        warn!(execution_id = %record.id, reason, "execution lost with its worker");
        record.fail(format!("{WORKER_LOST_MARKER}: {reason}"))?;
        self.persist(&record);
        Ok(record)
    }

    fn persist(&self, record: &ExecutionRecord) {
        if let Err(err) = self.store.save_execution_record(record) {
            warn!(
                execution_id = %record.id,
                error = %format!("{err:#}"),
                "failed to persist execution record"
            );
        }
    }
}
