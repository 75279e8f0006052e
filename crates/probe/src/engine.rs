//! One execution of a monitor: script, templating, HTTP attempt, assertions.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::Method;
use tracing::{info, warn};
use url::Url;

use crate::assertions;
use crate::model::{Auth, Monitor, MonitorResult, ERR_HTTP_ERROR_CODE};
use crate::script::{RequestContext, ScriptContext, ScriptError, ScriptRunner};
use crate::template::{self, Env};
use crate::transport::{status_ok, Exchange, HttpOptions, HttpTransport, PreparedRequest, TransportError};

pub struct Engine {
    transport: HttpTransport,
    scripts: Option<Arc<dyn ScriptRunner>>,
}

impl Engine {
    pub fn new(options: HttpOptions) -> Result<Self, TransportError> {
        Ok(Self { transport: HttpTransport::new(options)?, scripts: None })
    }

    pub fn with_scripts(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.scripts = Some(runner);
        self
    }

    /// Run the whole pipeline for `monitor` and return its result.
    ///
    /// The pre-request script sees the raw monitor and environment and may
    /// rewrite both; templating then runs over its output.
    pub async fn run(&self, monitor: &Monitor, env: Env, location: &str) -> MonitorResult {
        let mut monitor = monitor.clone();
        let mut env = env;

        if let Some(script) = monitor.pre_script.clone().filter(|s| !s.trim().is_empty()) {
            match self.run_script(&monitor, env, &script).await {
                Ok(ctx) => {
                    ctx.request.apply_to(&mut monitor);
                    env = ctx.env;
                }
                Err(e) => {
                    warn!(monitor_id = %monitor.id, error = %e, "Pre-request script failed");
                    return script_failure(&monitor, location, &e);
                }
            }
        }

        let resolved = template::resolve(&monitor, &env);
        let mut result = self.execute(&resolved, location).await;
        assertions::apply(&mut result, &resolved.assertions);

        info!(
            monitor_id = %result.monitor_id,
            location,
            code = result.code,
            total_ms = result.timings.total,
            err = %result.err,
            "Executed monitor"
        );
        result
    }

    async fn run_script(
        &self,
        monitor: &Monitor,
        env: Env,
        script: &str,
    ) -> Result<ScriptContext, ScriptError> {
        let Some(runner) = &self.scripts else {
            return Err(ScriptError::Unavailable("no script sandbox configured".into()));
        };
        let ctx = ScriptContext { request: RequestContext::from_monitor(monitor), env };
        runner.run(ctx, script).await
    }

    /// Perform the HTTP attempt for an already resolved monitor.
    pub async fn execute(&self, monitor: &Monitor, location: &str) -> MonitorResult {
        let timeout = monitor
            .timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.transport.options().timeout);

        let outcome = match prepare(monitor) {
            Ok(request) => self.transport.send(request, monitor.follow_redirects, timeout).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(exchange) => from_exchange(monitor, location, exchange),
            Err(e) => transport_failure(monitor, location, &e),
        }
    }
}

/// Build the outgoing request from a resolved monitor.
///
/// Header precedence, lowest first: body content type, monitor headers,
/// auth. The body is only sent when a content type accompanies it.
pub fn prepare(monitor: &Monitor) -> Result<PreparedRequest, TransportError> {
    let method = Method::from_bytes(monitor.method.trim().to_uppercase().as_bytes())
        .map_err(|_| TransportError::Other(format!("invalid HTTP method {:?}", monitor.method)))?;

    let mut url = Url::parse(monitor.url.trim()).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    if !monitor.query_params.is_empty() {
        url.query_pairs_mut().extend_pairs(monitor.query_params.iter());
    }

    let body = match (&monitor.body, &monitor.body_type) {
        (Some(body), Some(body_type)) if !body.is_empty() && !body_type.is_empty() => {
            Some((Bytes::from(body.clone()), body_type.clone()))
        }
        _ => None,
    };

    let mut headers = Vec::with_capacity(monitor.headers.len() + 2);
    if let Some((_, body_type)) = &body {
        if !monitor.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
            headers.push(("Content-Type".to_string(), body_type.clone()));
        }
    }
    headers.extend(monitor.headers.iter().filter(|(k, _)| !k.is_empty()).cloned());

    let authorization = match &monitor.auth {
        Auth::Bearer { token } if !token.is_empty() => Some(format!("Bearer {token}")),
        Auth::Basic { username, password } if !username.is_empty() => {
            Some(format!("Basic {}", STANDARD.encode(format!("{username}:{password}"))))
        }
        _ => None,
    };
    if let Some(value) = authorization {
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case("authorization"));
        headers.push(("Authorization".to_string(), value));
    }

    Ok(PreparedRequest { method, url, headers, body: body.map(|(bytes, _)| bytes) })
}

fn from_exchange(monitor: &Monitor, location: &str, exchange: Exchange) -> MonitorResult {
    let mut result = MonitorResult::shell(monitor, location);

    result.url = exchange.url.to_string();
    result.ip = exchange.ip.clone();
    result.code = exchange.status.as_u16();
    result.code_status = exchange.status.canonical_reason().unwrap_or_default().to_string();
    result.protocol = exchange.protocol().to_string();
    result.body_size = exchange.body.len();
    result.body = String::from_utf8_lossy(&exchange.body).into_owned();
    result.timings = exchange.timings;
    if let Some(cert) = exchange.cert {
        result.cert_common_name = Some(cert.common_name);
        result.cert_expiry_days = Some(cert.expiry_days);
    }
    result.headers = exchange.headers;

    if !status_ok(exchange.status, monitor.follow_redirects) {
        result.err = ERR_HTTP_ERROR_CODE.to_string();
    }
    result
}

/// Zero-valued result carrying the classification of `error`.
pub fn transport_failure(monitor: &Monitor, location: &str, error: &TransportError) -> MonitorResult {
    warn!(monitor_id = %monitor.id, url = %monitor.url, error = %error, "HTTP attempt failed");

    let mut result = MonitorResult::shell(monitor, location);
    result.err = error.code();
    if error.is_network() {
        result.code_status = result.err.clone();
    }
    result
}

/// Result for a monitor whose pre-request script failed. No request is made.
pub fn script_failure(monitor: &Monitor, location: &str, error: &ScriptError) -> MonitorResult {
    let mut result = MonitorResult::shell(monitor, location);
    result.err = error.text();
    result.code_status = result.err.clone();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(json: &str) -> Monitor {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_prepare_auth_and_body() {
        let m = monitor(
            r#"{"id":"m","accountId":"a","url":"https://api.test/x","method":"post",
                "headers":[["Authorization","stale"],["X-A","1"]],
                "queryParams":[["q","a b"]],
                "body":"{}","bodyType":"application/json",
                "auth":{"type":"bearer","token":"tok"}}"#,
        );

        let request = prepare(&m).unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url.as_str(), "https://api.test/x?q=a+b");
        assert_eq!(request.body.as_deref(), Some(&b"{}"[..]));
        assert_eq!(
            request.headers,
            vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-A".to_string(), "1".to_string()),
                ("Authorization".to_string(), "Bearer tok".to_string()),
            ]
        );
    }

    #[test]
    fn test_prepare_body_needs_type() {
        let m = monitor(r#"{"id":"m","accountId":"a","url":"http://h/","body":"payload"}"#);
        let request = prepare(&m).unwrap();
        assert!(request.body.is_none());
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_prepare_basic_auth() {
        let m = monitor(
            r#"{"id":"m","accountId":"a","url":"http://h/",
                "auth":{"type":"basic","username":"user","password":"pass"}}"#,
        );
        let request = prepare(&m).unwrap();
        assert_eq!(request.headers, vec![("Authorization".into(), "Basic dXNlcjpwYXNz".into())]);
    }

    #[test]
    fn test_prepare_invalid_url() {
        let m = monitor(r#"{"id":"m","accountId":"a","url":"not a url"}"#);
        let err = prepare(&m).unwrap_err();
        assert_eq!(err.code(), "ERR_INVALID_URL");
    }

    #[test]
    fn test_script_failure_mirrors_error() {
        let m = monitor(r#"{"id":"m","accountId":"a","url":"http://h/"}"#);
        let result = script_failure(&m, "us-east", &ScriptError::Failed("boom".into()));
        assert_eq!(result.err, "boom");
        assert_eq!(result.code_status, "boom");
        assert_eq!(result.code, 0);
    }
}
