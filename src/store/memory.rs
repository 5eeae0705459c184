// src/store/memory.rs

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::engine::{ExecutionId, ExecutionRecord, ResultHandle};
use crate::exec::QueryResult;

use super::ExecutionStore;

/// Keeps everything in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<ExecutionId, ExecutionRecord>>,
    results: Mutex<HashMap<ResultHandle, QueryResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl ExecutionStore for MemoryStore {
    fn save_execution_record(&self, record: &ExecutionRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("execution record map poisoned"))?;
        records.insert(record.id.clone(), record.clone());
        debug!(execution_id = %record.id, status = %record.status, "stored execution record (memory)");
        Ok(())
    }

    fn load_execution_record(&self, id: &ExecutionId) -> Result<Option<ExecutionRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("execution record map poisoned"))?;
        Ok(records.get(id).cloned())
    }

    fn save_result(&self, handle: &ResultHandle, result: &QueryResult) -> Result<()> {
        let mut results = self
            .results
            .lock()
            .map_err(|_| anyhow!("result map poisoned"))?;
        results.insert(handle.clone(), result.clone());
        Ok(())
    }

    fn load_result(&self, handle: &ResultHandle) -> Result<Option<QueryResult>> {
        let results = self
            .results
            .lock()
            .map_err(|_| anyhow!("result map poisoned"))?;
        Ok(results.get(handle).cloned())
    }
}
