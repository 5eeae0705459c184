// src/logging.rs

//! Logging setup for `querydrive` using `tracing` + `tracing-subscriber`.
//!
//! Filter priority:
//! 1. `--log-level` CLI flag (applies to querydrive; HTTP internals stay at warn)
//! 2. `QUERYDRIVE_LOG` environment variable, either a bare level ("debug") or
//!    a full directive list ("querydrive=trace,reqwest=debug")
//! 3. `info`
//!
//! Logs go to STDERR so that STDOUT carries only execution records and
//! result sets.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "QUERYDRIVE_LOG";

/// Directives appended to bare levels so connection-pool chatter from the
/// HTTP stack does not drown execution logs.
const QUIET_DEPENDENCIES: &str = "hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn";

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(lvl) => filter_for_level(level_name(lvl))?,
        None => match std::env::var(LOG_ENV_VAR) {
            Ok(raw) if !raw.trim().is_empty() => filter_from_env_value(&raw)?,
            _ => filter_for_level("info")?,
        },
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn filter_from_env_value(raw: &str) -> Result<EnvFilter> {
    let raw = raw.trim();
    if raw.contains('=') || raw.contains(',') {
        EnvFilter::try_new(raw).with_context(|| format!("invalid {LOG_ENV_VAR} value '{raw}'"))
    } else {
        filter_for_level(&raw.to_lowercase())
    }
}

fn filter_for_level(level: &str) -> Result<EnvFilter> {
    let level = if level == "warning" { "warn" } else { level };
    EnvFilter::try_new(format!("{level},{QUIET_DEPENDENCIES}"))
        .with_context(|| format!("invalid log level '{level}'"))
}

fn level_name(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
