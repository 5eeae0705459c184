// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration;
use crate::engine::PollOptions;
use crate::exec::ExecutorParams;
use crate::types::{BackoffKind, StorageMode};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// poll_interval = "1s"
/// timeout = "2d"
///
/// [engine.warehouse]
/// language = "trino"
/// executor = "trino"
///
/// [engine.warehouse.executor_params]
/// base_url = "http://trino:8080"
///
/// [engine.warehouse.feature_params]
/// status_checker = "select_one"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// All engines from `[engine.<name>]`, keyed by engine name.
    #[serde(default)]
    pub engine: BTreeMap<String, EngineConfig>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub engines: BTreeMap<String, EngineDescriptor>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        engines: BTreeMap<String, EngineDescriptor>,
    ) -> Self {
        Self { config, engines }
    }

    pub fn engine(&self, name: &str) -> Option<&EngineDescriptor> {
        self.engines.get(name)
    }
}

/// `[config]` section: process-wide execution defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Delay before the first status poll.
    #[serde(default = "default_poll_interval", deserialize_with = "duration::deserialize")]
    pub poll_interval: Duration,

    /// Ceiling for exponential backoff.
    #[serde(
        default = "default_max_poll_interval",
        deserialize_with = "duration::deserialize"
    )]
    pub max_poll_interval: Duration,

    #[serde(default)]
    pub backoff: BackoffKind,

    /// Wall-clock ceiling for one execution (two days unless configured).
    #[serde(default = "default_timeout", deserialize_with = "duration::deserialize")]
    pub timeout: Duration,

    /// How long a timed-out execution may take to wind down after `cancel()`.
    #[serde(default = "default_cancel_grace", deserialize_with = "duration::deserialize")]
    pub cancel_grace: Duration,

    #[serde(default)]
    pub storage: StorageMode,

    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,

    /// Poll ticks a status probe may take before being reported as WARN.
    #[serde(default = "default_status_check_ticks")]
    pub status_check_ticks: u32,

    #[serde(
        default = "default_status_check_ttl",
        deserialize_with = "duration::deserialize"
    )]
    pub status_check_ttl: Duration,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_timeout() -> Duration {
    Duration::from_secs(2 * 24 * 60 * 60)
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".querydrive")
}

fn default_max_concurrent_executions() -> usize {
    8
}

fn default_status_check_ticks() -> u32 {
    10
}

fn default_status_check_ttl() -> Duration {
    Duration::from_secs(60)
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_poll_interval: default_max_poll_interval(),
            backoff: BackoffKind::default(),
            timeout: default_timeout(),
            cancel_grace: default_cancel_grace(),
            storage: StorageMode::default(),
            storage_dir: default_storage_dir(),
            max_concurrent_executions: default_max_concurrent_executions(),
            status_check_ticks: default_status_check_ticks(),
            status_check_ttl: default_status_check_ttl(),
        }
    }
}

impl ConfigSection {
    /// Resolve the poll settings for one engine: feature params win over the
    /// global `[config]` values.
    pub fn poll_options_for(&self, features: &FeatureParams) -> PollOptions {
        PollOptions {
            interval: features.poll_interval.unwrap_or(self.poll_interval),
            max_interval: features.max_poll_interval.unwrap_or(self.max_poll_interval),
            backoff: features.backoff.unwrap_or(self.backoff),
            timeout: features.timeout.unwrap_or(self.timeout),
            cancel_grace: features.cancel_grace.unwrap_or(self.cancel_grace),
        }
    }
}

/// `[engine.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub language: String,

    /// Executor kind, e.g. `"trino"` or `"command"`.
    pub executor: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Connection parameters, validated against the executor template.
    #[serde(default)]
    pub executor_params: ExecutorParams,

    #[serde(default)]
    pub feature_params: FeatureParams,
}

/// `[engine.<name>.feature_params]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeatureParams {
    /// Name of the status checker used for health probes.
    #[serde(default = "default_status_checker")]
    pub status_checker: String,

    #[serde(default, deserialize_with = "duration::deserialize_opt", skip_serializing)]
    pub timeout: Option<Duration>,

    #[serde(default, deserialize_with = "duration::deserialize_opt", skip_serializing)]
    pub poll_interval: Option<Duration>,

    #[serde(default, deserialize_with = "duration::deserialize_opt", skip_serializing)]
    pub max_poll_interval: Option<Duration>,

    #[serde(default)]
    pub backoff: Option<BackoffKind>,

    #[serde(default, deserialize_with = "duration::deserialize_opt", skip_serializing)]
    pub cancel_grace: Option<Duration>,
}

fn default_status_checker() -> String {
    "null".to_string()
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            status_checker: default_status_checker(),
            timeout: None,
            poll_interval: None,
            max_poll_interval: None,
            backoff: None,
            cancel_grace: None,
        }
    }
}

/// Immutable description of one configured backend.
///
/// Loaded once per engine; an execution keeps its own clone so that
/// out-of-band edits never change a query mid-flight.
#[derive(Debug, Clone, Serialize)]
pub struct EngineDescriptor {
    pub name: String,
    pub language: String,
    pub executor: String,
    pub description: Option<String>,
    pub executor_params: ExecutorParams,
    pub feature_params: FeatureParams,
}

impl EngineDescriptor {
    pub fn from_config(name: impl Into<String>, cfg: EngineConfig) -> Self {
        Self {
            name: name.into(),
            language: cfg.language,
            executor: cfg.executor,
            description: cfg.description,
            executor_params: cfg.executor_params,
            feature_params: cfg.feature_params,
        }
    }

    pub fn status_checker(&self) -> &str {
        &self.feature_params.status_checker
    }
}
