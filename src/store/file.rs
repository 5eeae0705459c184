// src/store/file.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::engine::{ExecutionId, ExecutionRecord, ResultHandle};
use crate::exec::QueryResult;

use super::ExecutionStore;

/// JSON files under a storage directory:
///
/// ```text
/// <dir>/executions/<id>.json
/// <dir>/results/<handle>.json
/// ```
///
/// Every write goes to a temporary sibling first and is renamed into place,
/// so readers never see a half-written record.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &ExecutionId) -> PathBuf {
        self.root
            .join("executions")
            .join(format!("{}.json", sanitize(id.as_str())))
    }

    fn result_path(&self, handle: &ResultHandle) -> PathBuf {
        self.root
            .join("results")
            .join(format!("{}.json", sanitize(handle.as_str())))
    }
}

impl ExecutionStore for FileStore {
    fn save_execution_record(&self, record: &ExecutionRecord) -> Result<()> {
        let path = self.record_path(&record.id);
        write_json(&path, record)?;
        debug!(execution_id = %record.id, status = %record.status, path = ?path, "stored execution record (file)");
        Ok(())
    }

    fn load_execution_record(&self, id: &ExecutionId) -> Result<Option<ExecutionRecord>> {
        read_json(&self.record_path(id))
    }

    fn save_result(&self, handle: &ResultHandle, result: &QueryResult) -> Result<()> {
        let path = self.result_path(handle);
        if path.exists() {
            // Content addressed: same handle, same bytes.
            return Ok(());
        }
        write_json(&path, result)
    }

    fn load_result(&self, handle: &ResultHandle) -> Result<Option<QueryResult>> {
        read_json(&self.result_path(handle))
    }
}

/// Keep ids usable as file names.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("storage path {path:?} has no parent directory"))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("creating storage directory {parent:?}"))?;

    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value).context("serialising stored value")?;
    fs::write(&tmp, bytes).with_context(|| format!("writing {tmp:?}"))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming {tmp:?} to {path:?}"))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).with_context(|| format!("reading {path:?}"))?;
    let value = serde_json::from_slice(&bytes).with_context(|| format!("parsing {path:?}"))?;
    Ok(Some(value))
}
