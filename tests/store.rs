use std::error::Error;

use querydrive::engine::{ExecutionId, ExecutionRecord, ResultHandle};
use querydrive::exec::QueryResult;
use querydrive::store::{ExecutionStore, FileStore, MemoryStore, open_store};
use querydrive::types::{ExecutionStatus, StorageMode};
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn Error>>;

fn finished_record(id: &str) -> Result<(ExecutionRecord, QueryResult, ResultHandle), Box<dyn Error>> {
    let result = QueryResult::from_lines(["a", "b"]);
    let handle = ResultHandle::for_result(&result)?;
    let mut record = ExecutionRecord::new(ExecutionId::from(id), "warehouse", "alice");
    record.transition(ExecutionStatus::Running)?;
    record.append_log("query started\n");
    record.complete(Some(handle.clone()))?;
    Ok((record, result, handle))
}

#[test]
fn file_store_round_trips_records_and_results() -> TestResult {
    let dir = tempdir()?;
    let store = FileStore::new(dir.path().to_path_buf());
    let (record, result, handle) = finished_record("exec-1")?;

    store.save_execution_record(&record)?;
    store.save_result(&handle, &result)?;

    assert_eq!(store.load_execution_record(&record.id)?, Some(record.clone()));
    assert_eq!(store.load_result(&handle)?, Some(result));
    assert!(dir.path().join("executions").join("exec-1.json").exists());
    Ok(())
}

#[test]
fn file_store_overwrites_records_and_leaves_no_temp_files() -> TestResult {
    let dir = tempdir()?;
    let store = FileStore::new(dir.path().to_path_buf());
    let mut record = ExecutionRecord::new(ExecutionId::from("exec-2"), "warehouse", "bob");
    store.save_execution_record(&record)?;
    record.transition(ExecutionStatus::Running)?;
    store.save_execution_record(&record)?;

    let loaded = store.load_execution_record(&record.id)?;
    assert_eq!(loaded.map(|r| r.status), Some(ExecutionStatus::Running));

    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("executions"))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}

#[test]
fn missing_entries_load_as_none() -> TestResult {
    let dir = tempdir()?;
    let store = FileStore::new(dir.path().to_path_buf());
    assert!(store.load_execution_record(&ExecutionId::from("nope"))?.is_none());
    assert!(store.load_result(&ResultHandle::from("nope"))?.is_none());

    let memory = MemoryStore::new();
    assert!(memory.load_execution_record(&ExecutionId::from("nope"))?.is_none());
    Ok(())
}

#[test]
fn ids_cannot_escape_the_storage_directory() -> TestResult {
    let dir = tempdir()?;
    let root = dir.path().join("store");
    let store = FileStore::new(root.clone());
    let record = ExecutionRecord::new(ExecutionId::from("../../escape"), "warehouse", "eve");
    store.save_execution_record(&record)?;

    assert!(!dir.path().join("escape.json").exists());
    assert_eq!(store.load_execution_record(&record.id)?, Some(record));
    Ok(())
}

#[test]
fn open_store_picks_the_configured_backend() -> TestResult {
    let dir = tempdir()?;
    let (record, _, _) = finished_record("exec-3")?;

    let file = open_store(StorageMode::File, dir.path());
    file.save_execution_record(&record)?;
    assert!(dir.path().join("executions").join("exec-3.json").exists());

    let memory = open_store(StorageMode::Memory, dir.path());
    assert!(memory.load_execution_record(&record.id)?.is_none());
    memory.save_execution_record(&record)?;
    assert_eq!(memory.load_execution_record(&record.id)?, Some(record));
    Ok(())
}
