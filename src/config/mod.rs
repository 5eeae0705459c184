// src/config/mod.rs

//! Configuration loading and validation for querydrive.
//!
//! - [`model`] is the TOML-backed data model (`[config]`, `[engine.<name>]`).
//! - [`loader`] reads a config file from disk.
//! - [`validate`] checks structural invariants and, given the startup
//!   registries, that every engine can actually be built.
//! - [`duration`] parses `"250ms"` / `"2d"` style durations.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_and_validate_with, load_from_path};
pub use model::{
    ConfigFile, ConfigSection, EngineConfig, EngineDescriptor, FeatureParams, RawConfigFile,
};
pub use validate::{validate_engine, validate_engines};
