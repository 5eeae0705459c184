use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use querydrive::engine::{ExecutionId, ExecutionRecord, ResultHandle};
use querydrive::exec::QueryResult;
use querydrive::store::{ExecutionStore, MemoryStore};

/// Store whose writes can be made to fail, wrapping a `MemoryStore`.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_records: bool,
    fail_results: bool,
    record_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_records() -> Self {
        Self {
            fail_records: true,
            ..Self::default()
        }
    }

    pub fn failing_results() -> Self {
        Self {
            fail_results: true,
            ..Self::default()
        }
    }

    pub fn record_attempts(&self) -> usize {
        self.record_attempts.load(Ordering::SeqCst)
    }
}

impl ExecutionStore for FlakyStore {
    fn save_execution_record(&self, record: &ExecutionRecord) -> Result<()> {
        self.record_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_records {
            bail!("disk full");
        }
        self.inner.save_execution_record(record)
    }

    fn load_execution_record(&self, id: &ExecutionId) -> Result<Option<ExecutionRecord>> {
        self.inner.load_execution_record(id)
    }

    fn save_result(&self, handle: &ResultHandle, result: &QueryResult) -> Result<()> {
        if self.fail_results {
            bail!("result bucket unavailable");
        }
        self.inner.save_result(handle, result)
    }

    fn load_result(&self, handle: &ResultHandle) -> Result<Option<QueryResult>> {
        self.inner.load_result(handle)
    }
}

/// `MemoryStore` that also keeps every record snapshot it was handed.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    history: std::sync::Mutex<Vec<ExecutionRecord>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.history.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<querydrive::types::ExecutionStatus> {
        let mut out: Vec<_> = Vec::new();
        for rec in self.history() {
            if out.last() != Some(&rec.status) {
                out.push(rec.status);
            }
        }
        out
    }
}

impl ExecutionStore for RecordingStore {
    fn save_execution_record(&self, record: &ExecutionRecord) -> Result<()> {
        self.history.lock().unwrap().push(record.clone());
        self.inner.save_execution_record(record)
    }

    fn load_execution_record(&self, id: &ExecutionId) -> Result<Option<ExecutionRecord>> {
        self.inner.load_execution_record(id)
    }

    fn save_result(&self, handle: &ResultHandle, result: &QueryResult) -> Result<()> {
        self.inner.save_result(handle, result)
    }

    fn load_result(&self, handle: &ResultHandle) -> Result<Option<QueryResult>> {
        self.inner.load_result(handle)
    }
}
