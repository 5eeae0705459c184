// src/store/mod.rs

//! Persistence of execution records and result sets.
//!
//! Stores are shared by every execution in the process, so all methods take
//! `&self`. Callers treat save failures as non-fatal and only log them.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::engine::{ExecutionId, ExecutionRecord, ResultHandle};
use crate::exec::QueryResult;
use crate::types::StorageMode;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

pub trait ExecutionStore: Send + Sync {
    fn save_execution_record(&self, record: &ExecutionRecord) -> Result<()>;
    fn load_execution_record(&self, id: &ExecutionId) -> Result<Option<ExecutionRecord>>;
    fn save_result(&self, handle: &ResultHandle, result: &QueryResult) -> Result<()>;
    fn load_result(&self, handle: &ResultHandle) -> Result<Option<QueryResult>>;
}

/// Build the store selected by `[config].storage`.
pub fn open_store(mode: StorageMode, dir: &Path) -> Arc<dyn ExecutionStore> {
    match mode {
        StorageMode::File => Arc::new(FileStore::new(dir.to_path_buf())),
        StorageMode::Memory => Arc::new(MemoryStore::new()),
    }
}
