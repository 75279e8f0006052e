//! End-to-end runs of the execution engine against a local responder

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{closed_addr, monitor, response, serve, serve_silent, Seen};
use probe::script::{ScriptContext, ScriptError, ScriptRunner};
use probe::template::Env;
use probe::{Assertion, Engine, HttpOptions, Operator, Subject, ERR_ASSERTIONS, ERR_HTTP_ERROR_CODE};

fn engine() -> Engine {
    Engine::new(HttpOptions::default()).unwrap()
}

fn assertion(subject: Subject, op: Operator, value: &str) -> Assertion {
    Assertion { subject, op, value: value.to_string() }
}

#[tokio::test]
async fn test_successful_run_records_response() {
    let _ = tracing_subscriber::fmt::try_init();

    let server = serve(|_seen: &Seen| {
        response(
            200,
            "OK",
            &[("Content-Type", "application/json"), ("X-Dup", "one"), ("X-Dup", "two")],
            r#"{"headers":{"Host":"httpbin.org"}}"#,
        )
    })
    .await;

    let mut m = monitor(&server.url("/json"));
    m.assertions = vec![
        assertion(Subject::Code, Operator::Eq, "200"),
        assertion(Subject::JsonBody { name: "$.headers.Host".into() }, Operator::Eq, "httpbin.org"),
        assertion(Subject::Header { name: "x-dup".into() }, Operator::Eq, "one"),
    ];

    let result = engine().run(&m, Env::new(), "local").await;

    assert_eq!(result.err, "");
    assert_eq!(result.code, 200);
    assert_eq!(result.code_status, "OK");
    assert_eq!(result.protocol, "HTTP/1.1");
    assert_eq!(result.ip, "127.0.0.1");
    assert_eq!(result.location, "local");
    assert_eq!(result.body_size, result.body.len());
    assert!(result.cert_common_name.is_none());
    assert_eq!(result.headers.iter().filter(|(k, _)| k == "x-dup").count(), 2);
    assert_eq!(result.assert_results.len(), 3);
    assert!(result.assert_results.iter().all(|a| a.passed()));
}

#[tokio::test]
async fn test_error_status_skips_assertions() {
    let server = serve(|_: &Seen| response(500, "Internal Server Error", &[], "oops")).await;

    let mut m = monitor(&server.url("/"));
    m.assertions = vec![assertion(Subject::Code, Operator::Eq, "200")];

    let result = engine().run(&m, Env::new(), "local").await;

    assert_eq!(result.code, 500);
    assert_eq!(result.err, ERR_HTTP_ERROR_CODE);
    assert!(result.assert_results.is_empty());
}

#[tokio::test]
async fn test_failed_assertion_sets_sentinel() {
    let server = serve(|_: &Seen| response(200, "OK", &[], "hello")).await;

    let mut m = monitor(&server.url("/"));
    m.assertions = vec![
        assertion(Subject::Body, Operator::Contains, "hello"),
        assertion(Subject::Code, Operator::Eq, "401"),
    ];

    let result = engine().run(&m, Env::new(), "local").await;

    assert_eq!(result.err, ERR_ASSERTIONS);
    assert!(result.assert_results[0].passed());
    assert_eq!(result.assert_results[1].fail.as_deref(), Some("200"));
}

#[tokio::test]
async fn test_redirect_records_final_url() {
    let server = serve(|seen: &Seen| match seen.path.as_str() {
        "/a" => response(302, "Found", &[("Location", "/b")], ""),
        _ => response(200, "OK", &[], "landed"),
    })
    .await;

    let result = engine().run(&monitor(&server.url("/a")), Env::new(), "local").await;

    assert_eq!(result.err, "");
    assert_eq!(result.code, 200);
    assert_eq!(result.url, server.url("/b"));
    assert_eq!(result.body, "landed");
}

#[tokio::test]
async fn test_unfollowed_redirect_is_ok() {
    let server = serve(|_: &Seen| response(302, "Found", &[("Location", "/b")], "")).await;

    let mut m = monitor(&server.url("/a"));
    m.follow_redirects = false;

    let result = engine().run(&m, Env::new(), "local").await;

    assert_eq!(result.code, 302);
    assert_eq!(result.err, "");
    assert_eq!(result.url, server.url("/a"));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    let server = serve(|_: &Seen| response(302, "Found", &[("Location", "/again")], "")).await;

    let options = HttpOptions { max_redirects: 3, ..HttpOptions::default() };
    let result = Engine::new(options)
        .unwrap()
        .run(&monitor(&server.url("/")), Env::new(), "local")
        .await;

    assert_eq!(result.err, "ERR_TOO_MANY_REDIRECTS");
    assert_eq!(result.code, 0);
}

#[tokio::test]
async fn test_connection_refused_is_classified() {
    let addr = closed_addr().await;
    let result = engine().run(&monitor(&format!("http://{addr}/")), Env::new(), "local").await;

    assert_eq!(result.err, "ERR_CONNECTION_REFUSED");
    assert_eq!(result.code_status, "ERR_CONNECTION_REFUSED");
    assert_eq!(result.code, 0);
    assert_eq!(result.body, "");
}

#[tokio::test]
async fn test_monitor_timeout() {
    let server = serve_silent().await;

    let mut m = monitor(&server.url("/"));
    m.timeout = Some(1);

    let result = engine().run(&m, Env::new(), "local").await;
    assert_eq!(result.err, "ERR_TIMEOUT");
}

#[tokio::test]
async fn test_request_shape_sent_on_wire() {
    let captured: Arc<Mutex<Option<Seen>>> = Arc::default();
    let sink = captured.clone();
    let server = serve(move |seen: &Seen| {
        *sink.lock().unwrap() = Some(seen.clone());
        response(201, "Created", &[], "")
    })
    .await;

    let mut m: probe::Monitor = serde_json::from_value(serde_json::json!({
        "id": "mon-2",
        "accountId": "acct-1",
        "method": "POST",
        "url": format!("http://{}/items/{{{{ item }}}}", server.addr),
        "queryParams": [["trace", "{{trace}}"]],
        "headers": [["X-Env", "{{stage}}"]],
        "body": "{\"n\":{{RandomInt}}}",
        "bodyType": "application/json",
        "auth": {"type": "bearer", "token": "secret"},
    }))
    .unwrap();
    m.variables = vec![("stage".into(), "prod".into())];

    let env: Env = [("item", "42"), ("trace", "abc"), ("stage", "dev")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let env = probe::template::merge_env([env.into_iter().collect(), m.variables.clone()]);

    let result = engine().run(&m, env, "local").await;
    assert_eq!(result.err, "");

    let seen = captured.lock().unwrap().clone().unwrap();
    assert_eq!(seen.method, "POST");
    assert_eq!(seen.path, "/items/42?trace=abc");
    assert_eq!(seen.header("x-env"), Some("prod"));
    assert_eq!(seen.header("authorization"), Some("Bearer secret"));
    assert_eq!(seen.header("content-type"), Some("application/json"));
    assert_eq!(seen.header("connection"), Some("close"));
    assert_eq!(seen.header("user-agent"), Some("API Checker/1.0"));
    let n: u32 = serde_json::from_str::<serde_json::Value>(&seen.body).unwrap()["n"]
        .as_u64()
        .unwrap() as u32;
    assert!(n < 10_000);
}

struct RewritingScript;

#[async_trait]
impl ScriptRunner for RewritingScript {
    async fn run(&self, mut ctx: ScriptContext, _script: &str) -> Result<ScriptContext, ScriptError> {
        ctx.request.headers.push(("X-Signed".into(), "{{signature}}".into()));
        ctx.env.insert("signature".into(), "sig-1".into());
        Ok(ctx)
    }
}

struct FailingScript;

#[async_trait]
impl ScriptRunner for FailingScript {
    async fn run(&self, _ctx: ScriptContext, _script: &str) -> Result<ScriptContext, ScriptError> {
        Err(ScriptError::Failed("ReferenceError: x is not defined".into()))
    }
}

#[tokio::test]
async fn test_script_rewrites_before_templating() {
    let server = serve(|seen: &Seen| {
        let signed = seen.header("x-signed").unwrap_or_default().to_string();
        response(200, "OK", &[], &signed)
    })
    .await;

    let mut m = monitor(&server.url("/"));
    m.pre_script = Some("sign(request)".into());

    let result = engine()
        .with_scripts(Arc::new(RewritingScript))
        .run(&m, Env::new(), "local")
        .await;

    assert_eq!(result.err, "");
    assert_eq!(result.body, "sig-1");
}

#[tokio::test]
async fn test_script_failure_short_circuits() {
    let server = serve(|_: &Seen| response(200, "OK", &[], "")).await;

    let mut m = monitor(&server.url("/"));
    m.pre_script = Some("x.y".into());

    let result = engine().with_scripts(Arc::new(FailingScript)).run(&m, Env::new(), "local").await;

    assert_eq!(result.err, "ReferenceError: x is not defined");
    assert_eq!(result.code_status, result.err);
    assert_eq!(server.hits(), 0);
}
