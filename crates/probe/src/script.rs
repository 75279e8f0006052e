//! Pre-request script stage.
//!
//! Scripts run in an external sandbox. The sandbox receives the request
//! context plus the environment and hands back both, possibly rewritten.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{Monitor, Tuples};
use crate::template::Env;

#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script itself raised; the text is stored on the result verbatim.
    #[error("{0}")]
    Failed(String),
    #[error("script sandbox unavailable: {0}")]
    Unavailable(String),
}

impl ScriptError {
    pub fn text(&self) -> String {
        match self {
            ScriptError::Failed(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Request fields a script may read and rewrite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Tuples,
    #[serde(default)]
    pub query_params: Tuples,
}

impl RequestContext {
    pub fn from_monitor(monitor: &Monitor) -> Self {
        Self {
            method: monitor.method.clone(),
            url: monitor.url.clone(),
            headers: monitor.headers.clone(),
            query_params: monitor.query_params.clone(),
        }
    }

    /// Copy the rewritten request back onto `monitor`
    pub fn apply_to(self, monitor: &mut Monitor) {
        monitor.method = self.method;
        monitor.url = self.url;
        monitor.headers = self.headers;
        monitor.query_params = self.query_params;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptContext {
    pub request: RequestContext,
    pub env: Env,
}

#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, ctx: ScriptContext, script: &str) -> Result<ScriptContext, ScriptError>;
}

#[derive(Serialize)]
struct SandboxRequest<'a> {
    ctx: &'a ScriptContext,
    script: &'a str,
}

#[derive(Deserialize)]
struct SandboxResponse {
    #[serde(default)]
    ctx: Option<ScriptContext>,
    #[serde(default)]
    err: Option<String>,
}

/// Sandbox reached over HTTP
pub struct HttpSandbox {
    client: reqwest::Client,
    url: String,
}

impl HttpSandbox {
    pub fn new(url: impl Into<String>, timeout_seconds: u64) -> Result<Self, ScriptError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ScriptError::Unavailable(e.to_string()))?;

        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl ScriptRunner for HttpSandbox {
    async fn run(&self, ctx: ScriptContext, script: &str) -> Result<ScriptContext, ScriptError> {
        debug!(url = %self.url, "Running pre-request script");

        let response = self
            .client
            .post(&self.url)
            .json(&SandboxRequest { ctx: &ctx, script })
            .send()
            .await
            .map_err(|e| ScriptError::Unavailable(e.to_string()))?;

        let reply: SandboxResponse =
            response.json().await.map_err(|e| ScriptError::Unavailable(e.to_string()))?;

        match reply {
            SandboxResponse { err: Some(err), .. } if !err.is_empty() => Err(ScriptError::Failed(err)),
            SandboxResponse { ctx: Some(ctx), .. } => Ok(ctx),
            _ => Err(ScriptError::Unavailable("sandbox returned neither ctx nor err".into())),
        }
    }
}
