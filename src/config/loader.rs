// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::checker::CheckerRegistry;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::config::validate::validate_engines;
use crate::errors::{QueryDriveError, Result};
use crate::exec::ExecutorRegistry;

pub const CONFIG_ENV_VAR: &str = "QUERYDRIVE_CONFIG";

/// Load a configuration file and deserialize it, without semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        QueryDriveError::ConfigError(format!("reading config file {}: {e}", path.display()))
    })?;
    parse_str(&contents)
}

pub fn parse_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a configuration file and run structural validation.
///
/// Registry checks (executor pairs, parameter templates, status checkers)
/// need the registries built at startup; see [`load_and_validate_with`].
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    debug!(engines = config.engines.len(), "configuration loaded");
    Ok(config)
}

/// Load, validate structurally, then validate every engine against the
/// executor and checker registries.
pub fn load_and_validate_with(
    path: impl AsRef<Path>,
    executors: &ExecutorRegistry,
    checkers: &CheckerRegistry,
) -> Result<ConfigFile> {
    let config = load_and_validate(path)?;
    validate_engines(&config, executors, checkers)?;
    Ok(config)
}

/// Config path used when `--config` is not given: `QUERYDRIVE_CONFIG` if set,
/// otherwise `Querydrive.toml` in the working directory.
pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("Querydrive.toml"))
}
