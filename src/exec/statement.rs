// src/exec/statement.rs

//! Distributed-cluster client speaking the Trino/Presto HTTP statement
//! protocol.
//!
//! - `execute` POSTs the query to `{base_url}/v1/statement`.
//! - every `get_status` follows `nextUri` exactly once, accumulating column
//!   metadata, data pages, state changes and warnings.
//! - the query is terminal once a response carries no `nextUri`.
//! - `cancel` DELETEs the current `nextUri`.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::duration::parse_duration;
use crate::errors::{QueryDriveError, Result};
use crate::exec::backend::{BoxFuture, ClientCapabilities, EngineClient, QueryResult};
use crate::exec::factory::{ExecutorParams, ExecutorSpec, FieldType, TemplateField};
use crate::types::ExecutionStatus;

const DEFAULT_USER: &str = "querydrive";
const DEFAULT_REQUEST_TIMEOUT: &str = "30s";
const SOURCE: &str = "querydrive";
/// Consecutive failed poll round trips tolerated before giving up.
const MAX_POLL_FAILURES: u32 = 3;

/// Which flavour of the protocol to speak. Only the header prefix differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Trino,
    Presto,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Trino => "trino",
            Dialect::Presto => "presto",
        }
    }

    fn header(self, suffix: &str) -> String {
        match self {
            Dialect::Trino => format!("X-Trino-{suffix}"),
            Dialect::Presto => format!("X-Presto-{suffix}"),
        }
    }
}

pub fn executor_spec(dialect: Dialect) -> ExecutorSpec {
    ExecutorSpec::new(
        dialect.name(),
        dialect.name(),
        "SELECT 1",
        move |params: &ExecutorParams| {
            let client: Box<dyn EngineClient> =
                Box::new(StatementClient::from_params(dialect, params)?);
            Ok(client)
        },
    )
    .speaks_sql()
    .with_field(TemplateField::required(
        "base_url",
        FieldType::String,
        "Coordinator URL, e.g. http://coordinator:8080",
    ))
    .with_field(
        TemplateField::optional("user", FieldType::String, "User the query runs as")
            .with_default(DEFAULT_USER),
    )
    .with_field(TemplateField::optional(
        "catalog",
        FieldType::String,
        "Default catalog",
    ))
    .with_field(TemplateField::optional("schema", FieldType::String, "Default schema"))
    .with_field(TemplateField::optional(
        "password",
        FieldType::Password,
        "Password for HTTP basic auth",
    ))
    .with_field(
        TemplateField::optional(
            "request_timeout",
            FieldType::String,
            "Timeout of a single HTTP round trip",
        )
        .with_default(DEFAULT_REQUEST_TIMEOUT),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    id: String,
    #[serde(default)]
    next_uri: Option<String>,
    #[serde(default)]
    columns: Option<Vec<Column>>,
    #[serde(default)]
    data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    stats: Option<StatementStats>,
    #[serde(default)]
    error: Option<StatementError>,
    #[serde(default)]
    warnings: Vec<StatementWarning>,
}

#[derive(Debug, Deserialize)]
struct Column {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementStats {
    state: String,
    #[serde(default)]
    progress_percentage: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementError {
    message: String,
    #[serde(default)]
    error_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementWarning {
    message: String,
}

pub struct StatementClient {
    http: Client,
    dialect: Dialect,
    base_url: String,
    user: String,
    password: Option<String>,
    catalog: Option<String>,
    schema: Option<String>,

    status: ExecutionStatus,
    query_id: Option<String>,
    next_uri: Option<String>,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    log: String,
    last_state: Option<String>,
    last_progress: Option<u32>,
    seen_warnings: HashSet<String>,
    failed_polls: u32,
    /// Pages consumed by a previous worker are gone, so a reattached query
    /// never hands out a result set.
    reattached: bool,
    closed: bool,
}

impl std::fmt::Debug for StatementClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementClient")
            .field("dialect", &self.dialect)
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("status", &self.status)
            .field("query_id", &self.query_id)
            .finish_non_exhaustive()
    }
}

impl StatementClient {
    pub fn from_params(dialect: Dialect, params: &ExecutorParams) -> Result<Self> {
        let base_url = params
            .get_str("base_url")
            .ok_or_else(|| QueryDriveError::ConfigError("base_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let timeout = parse_duration(
            params
                .get_str("request_timeout")
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        )
        .map_err(|e| QueryDriveError::ConfigError(format!("request_timeout: {e}")))?;

        let http = build_http_client(timeout)?;

        Ok(Self {
            http,
            dialect,
            base_url,
            user: params.get_str("user").unwrap_or(DEFAULT_USER).to_string(),
            password: params.get_str("password").map(str::to_string),
            catalog: params.get_str("catalog").map(str::to_string),
            schema: params.get_str("schema").map(str::to_string),
            status: ExecutionStatus::Initialized,
            query_id: None,
            next_uri: None,
            columns: Vec::new(),
            rows: Vec::new(),
            log: String::new(),
            last_state: None,
            last_progress: None,
            seen_warnings: HashSet::new(),
            failed_polls: 0,
            reattached: false,
            closed: false,
        })
    }

    fn push_log(&mut self, line: impl AsRef<str>) {
        self.log.push_str(line.as_ref());
        self.log.push('\n');
    }

    fn with_session(&self, req: RequestBuilder) -> RequestBuilder {
        let mut req = req
            .header(self.dialect.header("User"), &self.user)
            .header(self.dialect.header("Source"), SOURCE);
        if let Some(catalog) = &self.catalog {
            req = req.header(self.dialect.header("Catalog"), catalog);
        }
        if let Some(schema) = &self.schema {
            req = req.header(self.dialect.header("Schema"), schema);
        }
        if let Some(password) = &self.password {
            req = req.basic_auth(&self.user, Some(password));
        }
        req
    }

    async fn submit(&mut self, query: &str) -> std::result::Result<StatementResponse, String> {
        let url = format!("{}/v1/statement", self.base_url);
        let req = self
            .with_session(self.http.post(&url))
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(query.to_string());
        let resp = req
            .send()
            .await
            .map_err(|e| format!("submitting query to {url}: {e}"))?;
        decode(resp).await
    }

    async fn advance(&mut self, uri: &str) -> std::result::Result<StatementResponse, String> {
        let resp = self
            .with_session(self.http.get(uri))
            .send()
            .await
            .map_err(|e| format!("polling {uri}: {e}"))?;
        decode(resp).await
    }

    async fn delete(&self, uri: &str) -> bool {
        match self.with_session(self.http.delete(uri)).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), uri, "coordinator refused cancellation");
                false
            }
            Err(e) => {
                warn!(error = %e, uri, "cancellation request failed");
                false
            }
        }
    }

    fn absorb(&mut self, resp: StatementResponse) {
        if self.query_id.is_none() {
            self.push_log(format!("query id: {}", resp.id));
            self.query_id = Some(resp.id.clone());
        }

        if let Some(stats) = &resp.stats {
            if self.last_state.as_deref() != Some(stats.state.as_str()) {
                self.push_log(format!("state: {}", stats.state));
                self.last_state = Some(stats.state.clone());
            }
            if let Some(pct) = stats.progress_percentage {
                let pct = pct.clamp(0.0, 100.0).floor() as u32;
                if self.last_progress != Some(pct) {
                    self.push_log(format!("progress: {pct}%"));
                    self.last_progress = Some(pct);
                }
            }
        }

        for warning in resp.warnings {
            if self.seen_warnings.insert(warning.message.clone()) {
                self.push_log(format!("warning: {}", warning.message));
            }
        }

        if self.columns.is_empty() {
            if let Some(columns) = resp.columns {
                self.columns = columns.into_iter().map(|c| c.name).collect();
            }
        }
        if let Some(data) = resp.data {
            self.rows.extend(data);
        }

        let failed_state = self.last_state.as_deref() == Some("FAILED");
        if let Some(err) = &resp.error {
            let name = err.error_name.as_deref().unwrap_or("QUERY_FAILED");
            self.push_log(format!("{name}: {}", err.message));
        }

        self.next_uri = resp.next_uri;
        if self.next_uri.is_none() {
            self.status = if resp.error.is_some() || failed_state {
                ExecutionStatus::Error
            } else {
                ExecutionStatus::Done
            };
            info!(query_id = ?self.query_id, status = %self.status, "statement finished");
        }
    }
}

fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| QueryDriveError::ConfigError(format!("building HTTP client: {e}")))
}

async fn decode(resp: Response) -> std::result::Result<StatementResponse, String> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(format!("coordinator answered HTTP {status}: {}", body.trim()));
    }
    resp.json::<StatementResponse>()
        .await
        .map_err(|e| format!("decoding coordinator response: {e}"))
}

impl EngineClient for StatementClient {
    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            supports_cancellation: true,
            supports_reattach: true,
            synchronous: false,
        }
    }

    fn execute<'a>(&'a mut self, query: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.status != ExecutionStatus::Initialized {
                warn!(status = %self.status, "statement client asked to execute twice; ignoring");
                return;
            }
            self.status = ExecutionStatus::Running;
            match self.submit(query).await {
                Ok(resp) => self.absorb(resp),
                Err(msg) => {
                    self.push_log(msg);
                    self.status = ExecutionStatus::Error;
                }
            }
        })
    }

    fn get_status(&mut self) -> BoxFuture<'_, ExecutionStatus> {
        Box::pin(async move {
            if self.status != ExecutionStatus::Running {
                return self.status;
            }
            let Some(uri) = self.next_uri.clone() else {
                return self.status;
            };
            match self.advance(&uri).await {
                Ok(resp) => {
                    self.failed_polls = 0;
                    self.absorb(resp);
                }
                Err(msg) => {
                    self.failed_polls += 1;
                    debug!(attempt = self.failed_polls, error = %msg, "poll round trip failed");
                    if self.failed_polls >= MAX_POLL_FAILURES {
                        self.push_log(msg);
                        self.status = ExecutionStatus::Error;
                    }
                }
            }
            self.status
        })
    }

    fn get_logs(&mut self) -> BoxFuture<'_, String> {
        let logs = self.log.clone();
        Box::pin(async move { logs })
    }

    fn get_results(&mut self) -> BoxFuture<'_, Option<QueryResult>> {
        let complete = self.status == ExecutionStatus::Done && !self.reattached;
        let result = complete.then(|| QueryResult {
            columns: self.columns.clone(),
            rows: self.rows.clone(),
        });
        Box::pin(async move { result })
    }

    fn cancel(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            match self.status {
                ExecutionStatus::Initialized => {
                    self.status = ExecutionStatus::Cancel;
                    true
                }
                ExecutionStatus::Running => {
                    let Some(uri) = self.next_uri.clone() else {
                        return false;
                    };
                    if !self.delete(&uri).await {
                        return false;
                    }
                    self.push_log("query cancelled");
                    self.next_uri = None;
                    self.status = ExecutionStatus::Cancel;
                    true
                }
                _ => false,
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return;
            }
            self.closed = true;
            if self.status == ExecutionStatus::Running {
                if let Some(uri) = self.next_uri.take() {
                    debug!(uri = %uri, "closing with a live statement; releasing it");
                    self.delete(&uri).await;
                }
            }
            self.rows.clear();
        })
    }

    fn remote_handle(&self) -> Option<String> {
        self.next_uri.clone()
    }

    fn reattach<'a>(&'a mut self, handle: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            if self.status != ExecutionStatus::Initialized {
                return false;
            }
            self.next_uri = Some(handle.to_string());
            self.status = ExecutionStatus::Running;
            self.reattached = true;
            self.push_log(format!("reattached to {handle}; earlier result pages are not recoverable"));
            true
        })
    }
}
