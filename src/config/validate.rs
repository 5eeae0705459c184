// src/config/validate.rs

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::checker::{CheckerRegistry, ensure_compatible};
use crate::config::model::{ConfigFile, ConfigSection, EngineDescriptor, RawConfigFile};
use crate::errors::{QueryDriveError, Result};
use crate::exec::ExecutorRegistry;

static ENGINE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+$").expect("engine name pattern is valid")
});

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = QueryDriveError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let engines: BTreeMap<String, EngineDescriptor> = raw
            .engine
            .into_iter()
            .map(|(name, cfg)| (name.clone(), EngineDescriptor::from_config(name, cfg)))
            .collect();
        Ok(ConfigFile::new_unchecked(raw.config, engines))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_global_config(&cfg.config)?;
    for (name, engine) in cfg.engine.iter() {
        validate_engine_name(name)?;
        if engine.language.trim().is_empty() || engine.executor.trim().is_empty() {
            return Err(QueryDriveError::ConfigError(format!(
                "engine '{name}' must set both `language` and `executor`"
            )));
        }
        let features = &engine.feature_params;
        for (field, value) in [
            ("timeout", features.timeout),
            ("poll_interval", features.poll_interval),
            ("max_poll_interval", features.max_poll_interval),
        ] {
            if value.is_some_and(|d| d.is_zero()) {
                return Err(QueryDriveError::ConfigError(format!(
                    "[engine.{name}.feature_params].{field} must be greater than zero"
                )));
            }
        }
        let effective = cfg.config.poll_options_for(features);
        if effective.interval > effective.max_interval {
            return Err(QueryDriveError::ConfigError(format!(
                "engine '{name}': poll_interval ({:?}) exceeds max_poll_interval ({:?})",
                effective.interval, effective.max_interval
            )));
        }
    }
    Ok(())
}

fn validate_engine_name(name: &str) -> Result<()> {
    if !ENGINE_NAME.is_match(name) {
        return Err(QueryDriveError::ConfigError(format!(
            "invalid engine name '{name}': only letters, digits, '_', '.' and '-' are allowed"
        )));
    }
    Ok(())
}

fn validate_global_config(cfg: &ConfigSection) -> Result<()> {
    for (field, value) in [
        ("poll_interval", cfg.poll_interval),
        ("max_poll_interval", cfg.max_poll_interval),
        ("timeout", cfg.timeout),
    ] {
        if value.is_zero() {
            return Err(QueryDriveError::ConfigError(format!(
                "[config].{field} must be greater than zero"
            )));
        }
    }

    if cfg.poll_interval > cfg.max_poll_interval {
        return Err(QueryDriveError::ConfigError(format!(
            "[config].poll_interval ({:?}) exceeds max_poll_interval ({:?})",
            cfg.poll_interval, cfg.max_poll_interval
        )));
    }

    if cfg.max_concurrent_executions == 0 {
        return Err(QueryDriveError::ConfigError(
            "[config].max_concurrent_executions must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.status_check_ticks == 0 {
        return Err(QueryDriveError::ConfigError(
            "[config].status_check_ticks must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

/// Check every engine against the registries built at startup: the executor
/// pair must be registered, its params must satisfy the template, and the
/// status checker must exist.
pub fn validate_engines(
    cfg: &ConfigFile,
    executors: &ExecutorRegistry,
    checkers: &CheckerRegistry,
) -> Result<()> {
    for engine in cfg.engines.values() {
        validate_engine(engine, executors, checkers)?;
    }
    Ok(())
}

pub fn validate_engine(
    engine: &EngineDescriptor,
    executors: &ExecutorRegistry,
    checkers: &CheckerRegistry,
) -> Result<()> {
    let spec = executors.get_executor_class(&engine.language, &engine.executor)?;
    spec.validate_params(&engine.executor_params).map_err(|e| match e {
        QueryDriveError::ConfigError(msg) => {
            QueryDriveError::ConfigError(format!("engine '{}': {msg}", engine.name))
        }
        other => other,
    })?;
    let checker = checkers.get_engine_checker_class(engine.status_checker())?;
    ensure_compatible(checker.as_ref(), spec).map_err(|e| match e {
        QueryDriveError::ConfigError(msg) => {
            QueryDriveError::ConfigError(format!("engine '{}': {msg}", engine.name))
        }
        other => other,
    })?;
    Ok(())
}
