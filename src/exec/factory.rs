// src/exec/factory.rs

//! Client factory: resolves `(language, executor)` to a client constructor.
//!
//! The registry is built once at startup ([`ExecutorRegistry::builtin`]) and
//! passed around by reference; there is no process-global executor list.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{QueryDriveError, Result};
use crate::exec::backend::EngineClient;
use crate::exec::{command, script, statement};

/// Engine-specific executor parameters (`[engine.<name>.executor_params]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutorParams(Map<String, Value>);

impl ExecutorParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// `overrides` win over `self`.
    pub fn merged_with(&self, overrides: &ExecutorParams) -> ExecutorParams {
        let mut merged = self.0.clone();
        for (k, v) in overrides.0.iter() {
            merged.insert(k.clone(), v.clone());
        }
        ExecutorParams(merged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    /// A string that must not be echoed back in listings or logs.
    Password,
    Integer,
    Boolean,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String | FieldType::Password => value.is_string(),
            FieldType::Integer => value.is_u64() || value.is_i64(),
            FieldType::Boolean => value.is_boolean(),
        }
    }
}

/// One configuration field accepted by an executor kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateField {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

impl TemplateField {
    pub fn required(name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        Self {
            name,
            field_type,
            required: true,
            default: None,
            description,
        }
    }

    pub fn optional(name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        Self {
            name,
            field_type,
            required: false,
            default: None,
            description,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

pub type ClientConstructor =
    Arc<dyn Fn(&ExecutorParams) -> Result<Box<dyn EngineClient>> + Send + Sync>;

/// A registered executor kind.
#[derive(Clone)]
pub struct ExecutorSpec {
    language: String,
    name: String,
    probe_query: String,
    /// Queries are SQL text (as opposed to scripts or shell commands).
    sql: bool,
    template: Vec<TemplateField>,
    constructor: ClientConstructor,
}

impl fmt::Debug for ExecutorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorSpec")
            .field("language", &self.language)
            .field("name", &self.name)
            .field("probe_query", &self.probe_query)
            .field("sql", &self.sql)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

impl ExecutorSpec {
    pub fn new<F>(
        language: impl Into<String>,
        name: impl Into<String>,
        probe_query: impl Into<String>,
        constructor: F,
    ) -> Self
    where
        F: Fn(&ExecutorParams) -> Result<Box<dyn EngineClient>> + Send + Sync + 'static,
    {
        Self {
            language: language.into(),
            name: name.into(),
            probe_query: probe_query.into(),
            sql: false,
            template: Vec::new(),
            constructor: Arc::new(constructor),
        }
    }

    /// Mark the executor as taking SQL queries.
    pub fn speaks_sql(mut self) -> Self {
        self.sql = true;
        self
    }

    pub fn accepts_sql(&self) -> bool {
        self.sql
    }

    pub fn with_field(mut self, field: TemplateField) -> Self {
        self.template.push(field);
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Minimal query used by status checkers.
    pub fn probe_query(&self) -> &str {
        &self.probe_query
    }

    pub fn template(&self) -> &[TemplateField] {
        &self.template
    }

    /// Check `params` against the template and fill in defaults.
    pub fn validate_params(&self, params: &ExecutorParams) -> Result<ExecutorParams> {
        for key in params.keys() {
            if !self.template.iter().any(|f| f.name == key.as_str()) {
                return Err(QueryDriveError::ConfigError(format!(
                    "executor '{}' does not accept parameter '{key}'",
                    self.name
                )));
            }
        }

        let mut resolved = params.clone();
        for field in self.template.iter() {
            match params.get(field.name) {
                Some(value) if !field.field_type.accepts(value) => {
                    return Err(QueryDriveError::ConfigError(format!(
                        "executor '{}' parameter '{}' must be of type {:?}",
                        self.name, field.name, field.field_type
                    )));
                }
                Some(_) => {}
                None => match (&field.default, field.required) {
                    (Some(default), _) => resolved.insert(field.name, default.clone()),
                    (None, true) => {
                        return Err(QueryDriveError::ConfigError(format!(
                            "executor '{}' requires parameter '{}'",
                            self.name, field.name
                        )));
                    }
                    (None, false) => {}
                },
            }
        }
        Ok(resolved)
    }

    /// Copy of `params` with every password field masked, for listings.
    pub fn redact(&self, params: &ExecutorParams) -> ExecutorParams {
        let mut redacted = params.clone();
        for field in self.template.iter() {
            if field.field_type == FieldType::Password && params.get(field.name).is_some() {
                redacted.insert(field.name, "********");
            }
        }
        redacted
    }

    /// Validate params, then construct a fresh client for one execution.
    pub fn create_client(&self, params: &ExecutorParams) -> Result<Box<dyn EngineClient>> {
        let resolved = self.validate_params(params)?;
        debug!(language = %self.language, executor = %self.name, "constructing engine client");
        (self.constructor)(&resolved)
    }
}

/// Template listing for the administration collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct FlattenedExecutorTemplate {
    pub language: String,
    pub name: String,
    pub template: Vec<TemplateField>,
}

/// Read-only registry of supported executor kinds.
#[derive(Debug, Default, Clone)]
pub struct ExecutorRegistry {
    specs: Vec<ExecutorSpec>,
}

impl ExecutorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in client variant.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        let specs = [
            script::executor_spec(),
            command::executor_spec(),
            statement::executor_spec(statement::Dialect::Trino),
            statement::executor_spec(statement::Dialect::Presto),
        ];
        for spec in specs {
            // Built-in names are distinct.
            let _ = registry.register(spec);
        }
        registry
    }

    pub fn register(&mut self, spec: ExecutorSpec) -> Result<()> {
        if self
            .specs
            .iter()
            .any(|s| s.language == spec.language && s.name == spec.name)
        {
            return Err(QueryDriveError::ConfigError(format!(
                "executor '{}' for language '{}' is already registered",
                spec.name, spec.language
            )));
        }
        self.specs.push(spec);
        Ok(())
    }

    pub fn get_executor_class(&self, language: &str, executor: &str) -> Result<&ExecutorSpec> {
        self.specs
            .iter()
            .find(|s| s.language == language && s.name == executor)
            .ok_or_else(|| QueryDriveError::UnsupportedEngine {
                language: language.to_string(),
                executor: executor.to_string(),
            })
    }

    pub fn get_flattened_executor_template(&self) -> Vec<FlattenedExecutorTemplate> {
        self.specs
            .iter()
            .map(|s| FlattenedExecutorTemplate {
                language: s.language.clone(),
                name: s.name.clone(),
                template: s.template.clone(),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutorSpec> {
        self.specs.iter()
    }
}
