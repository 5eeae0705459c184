// src/lib.rs

pub mod checker;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod store;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::checker::{CheckerRegistry, EngineStatusService, ProbeOptions};
use crate::cli::{CliArgs, Command, RunArgs};
use crate::config::{ConfigFile, default_config_path, load_and_validate_with};
use crate::engine::{ExecutionId, ExecutionRecord, ExecutionRequest, ExecutionService};
use crate::exec::{ExecutorParams, ExecutorRegistry};
use crate::store::open_store;
use crate::types::{CheckStatus, ExecutionStatus};

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - executor and checker registries
/// - config loading and validation
/// - the execution store and service
/// - Ctrl-C handling (cancels the running execution)
pub async fn run(args: CliArgs) -> Result<i32> {
    let executors = Arc::new(ExecutorRegistry::builtin());
    let checkers = Arc::new(CheckerRegistry::builtin());

    // Listings that do not need a config file.
    match &args.command {
        Command::Templates => {
            print_json(&executors.get_flattened_executor_template())?;
            return Ok(0);
        }
        Command::Checkers => {
            for name in checkers.names() {
                println!("{name}");
            }
            return Ok(0);
        }
        _ => {}
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_and_validate_with(&config_path, &executors, &checkers)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    let cfg = Arc::new(cfg);
    debug!(path = %config_path.display(), engines = cfg.engines.len(), "configuration ready");

    match args.command {
        Command::Run(run_args) => run_query(cfg, executors, run_args).await,
        Command::Check { engine } => check_engines(&cfg, executors, checkers, engine).await,
        Command::Engines => {
            print_engines(&cfg, &executors)?;
            Ok(0)
        }
        Command::Resume { id } => resume(cfg, executors, id).await,
        Command::Templates | Command::Checkers => Ok(0),
    }
}

fn build_service(cfg: Arc<ConfigFile>, executors: Arc<ExecutorRegistry>) -> ExecutionService {
    let store = open_store(cfg.config.storage, &cfg.config.storage_dir);
    ExecutionService::new(cfg, executors, store)
}

async fn run_query(
    cfg: Arc<ConfigFile>,
    executors: Arc<ExecutorRegistry>,
    args: RunArgs,
) -> Result<i32> {
    let query = match (&args.query, &args.file) {
        (Some(query), _) => query.clone(),
        (None, Some(path)) => read_query(path)?,
        (None, None) => anyhow::bail!("either --query or --file is required"),
    };

    let mut params = ExecutorParams::new();
    for (key, value) in args.params {
        params.insert(key, value);
    }

    let service = build_service(cfg, executors);
    let request = ExecutionRequest::new(&args.engine, query, &args.principal).with_params(params);
    info!(execution_id = %request.id, engine = %request.engine, "submitting query");

    let handle = service.submit(request);

    // Ctrl-C → cancellation request; the poller picks it up on its next tick.
    {
        let cancel = handle.cancel_handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; requesting cancellation");
            cancel.cancel();
        });
    }

    let record = handle.wait().await?;
    report_record(&service, &record)
}

async fn resume(cfg: Arc<ConfigFile>, executors: Arc<ExecutorRegistry>, id: String) -> Result<i32> {
    let service = build_service(cfg, executors);
    let record = service.resume_execution(&ExecutionId::from(id)).await?;
    report_record(&service, &record)
}

/// Print the record (and the result set when DONE). Non-DONE outcomes exit 1.
fn report_record(service: &ExecutionService, record: &ExecutionRecord) -> Result<i32> {
    let result = match &record.result {
        Some(handle) => service.load_result(handle)?,
        None => None,
    };
    print_json(&json!({ "record": record, "result": result }))?;

    if let Err(err) = record.outcome() {
        warn!(execution_id = %record.id, error = %err, "execution did not succeed");
    }
    Ok(if record.status == ExecutionStatus::Done { 0 } else { 1 })
}

async fn check_engines(
    cfg: &ConfigFile,
    executors: Arc<ExecutorRegistry>,
    checkers: Arc<CheckerRegistry>,
    only: Option<String>,
) -> Result<i32> {
    let options = ProbeOptions {
        max_ticks: cfg.config.status_check_ticks,
        interval: cfg.config.poll_interval,
    };
    let service = EngineStatusService::new(executors, checkers, options, cfg.config.status_check_ttl);

    let engines: Vec<_> = match &only {
        Some(name) => vec![
            cfg.engine(name)
                .with_context(|| format!("unknown engine '{name}'"))?,
        ],
        None => cfg.engines.values().collect(),
    };

    let mut worst_is_error = false;
    let mut reports = Vec::with_capacity(engines.len());
    for engine in engines {
        let report = service.check_engine(engine).await?;
        worst_is_error |= report.status == CheckStatus::Error;
        reports.push(json!({
            "engine": engine.name,
            "checker": engine.status_checker(),
            "report": report,
        }));
    }
    print_json(&reports)?;
    Ok(if worst_is_error { 1 } else { 0 })
}

fn print_engines(cfg: &ConfigFile, executors: &ExecutorRegistry) -> Result<()> {
    let listing: Vec<_> = cfg
        .engines
        .values()
        .map(|engine| {
            let params = executors
                .get_executor_class(&engine.language, &engine.executor)
                .map(|spec| spec.redact(&engine.executor_params))
                .unwrap_or_else(|_| engine.executor_params.clone());
            json!({
                "name": engine.name,
                "language": engine.language,
                "executor": engine.executor,
                "description": engine.description,
                "executor_params": params,
                "feature_params": engine.feature_params,
            })
        })
        .collect();
    print_json(&listing)
}

fn read_query(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading query file {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialising output")?;
    println!("{text}");
    Ok(())
}
