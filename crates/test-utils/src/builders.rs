#![allow(dead_code)]

use std::time::Duration;

use querydrive::config::{ConfigFile, EngineConfig, FeatureParams, RawConfigFile};
use querydrive::types::BackoffKind;
use serde_json::Value;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        // Fast polling so tests do not wait on the production cadence.
        config.config.poll_interval = Duration::from_millis(10);
        config.config.max_poll_interval = Duration::from_millis(50);
        config.config.backoff = BackoffKind::Fixed;
        Self { config }
    }

    pub fn with_engine(mut self, name: &str, engine: EngineConfig) -> Self {
        self.config.engine.insert(name.to_string(), engine);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.config.timeout = timeout;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.config.config.cancel_grace = grace;
        self
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.config.config.max_concurrent_executions = n;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `EngineConfig`.
pub struct EngineConfigBuilder {
    engine: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new(language: &str, executor: &str) -> Self {
        Self {
            engine: EngineConfig {
                language: language.to_string(),
                executor: executor.to_string(),
                description: None,
                executor_params: Default::default(),
                feature_params: FeatureParams::default(),
            },
        }
    }

    pub fn script() -> Self {
        Self::new("script", "inline")
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.engine.executor_params.insert(key, value);
        self
    }

    pub fn checker(mut self, name: &str) -> Self {
        self.engine.feature_params.status_checker = name.to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.engine.feature_params.timeout = Some(timeout);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.engine.feature_params.poll_interval = Some(interval);
        self
    }

    pub fn build(self) -> EngineConfig {
        self.engine
    }
}
