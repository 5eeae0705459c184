// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `querydrive`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "querydrive",
    version,
    about = "Run queries against configured engines through one execution lifecycle.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `$QUERYDRIVE_CONFIG`, else `Querydrive.toml` in the current
    /// working directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `QUERYDRIVE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run one query and wait for its terminal status.
    Run(RunArgs),
    /// Probe an engine with its configured status checker.
    Check {
        /// Engine name; all engines when omitted.
        #[arg(long, value_name = "NAME")]
        engine: Option<String>,
    },
    /// Print the configuration template of every executor kind as JSON.
    Templates,
    /// List the available status checkers.
    Checkers,
    /// List the configured engines.
    Engines,
    /// Resume an execution left behind by a stopped worker.
    Resume {
        /// Execution id as printed by `run`.
        #[arg(value_name = "ID")]
        id: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Engine to run against.
    #[arg(long, value_name = "NAME")]
    pub engine: String,

    /// Query text.
    #[arg(long, value_name = "TEXT", conflicts_with = "file", required_unless_present = "file")]
    pub query: Option<String>,

    /// Read the query text from a file.
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Submitting principal recorded on the execution.
    #[arg(long, value_name = "NAME", default_value = "cli")]
    pub principal: String,

    /// Executor parameter override, `key=value`. Values parse as JSON when
    /// possible (`max_rows=10`), otherwise as strings.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, serde_json::Value)>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
