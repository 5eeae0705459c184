// src/checker/service.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::checker::{CheckReport, CheckerRegistry, ProbeOptions, ensure_compatible};
use crate::config::EngineDescriptor;
use crate::errors::Result;
use crate::exec::ExecutorRegistry;

/// Runs the configured checker of an engine and caches the report for a
/// while, so dashboards polling health do not hammer the backend.
#[derive(Debug, Clone)]
pub struct EngineStatusService {
    executors: Arc<ExecutorRegistry>,
    checkers: Arc<CheckerRegistry>,
    options: ProbeOptions,
    ttl: Duration,
    cache: Arc<Mutex<HashMap<String, (Instant, CheckReport)>>>,
}

impl EngineStatusService {
    pub fn new(
        executors: Arc<ExecutorRegistry>,
        checkers: Arc<CheckerRegistry>,
        options: ProbeOptions,
        ttl: Duration,
    ) -> Self {
        Self {
            executors,
            checkers,
            options,
            ttl,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check `engine`, serving a cached report when it is younger than the
    /// TTL. Unknown executor or checker names are configuration errors.
    pub async fn check_engine(&self, engine: &EngineDescriptor) -> Result<CheckReport> {
        if let Some(report) = self.cached(&engine.name) {
            debug!(engine = %engine.name, "serving cached status report");
            return Ok(report);
        }

        let spec = self
            .executors
            .get_executor_class(&engine.language, &engine.executor)?;
        let checker = self.checkers.get_engine_checker_class(engine.status_checker())?;
        ensure_compatible(checker.as_ref(), spec)?;

        let report = checker
            .perform_check_with_executor(spec, &engine.executor_params, engine, self.options)
            .await;
        info!(
            engine = %engine.name,
            checker = checker.name(),
            status = %report.status,
            "engine status checked"
        );

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(engine.name.clone(), (Instant::now(), report.clone()));
        }
        Ok(report)
    }

    /// Drop the cached report of `engine`, e.g. after its configuration changed.
    pub fn invalidate(&self, engine: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(engine);
        }
    }

    fn cached(&self, engine: &str) -> Option<CheckReport> {
        let cache = self.cache.lock().ok()?;
        let (at, report) = cache.get(engine)?;
        (at.elapsed() < self.ttl).then(|| report.clone())
    }
}
