//! Monitor-level template resolution

mod common;

use probe::template::{has_placeholders, merge_env, resolve, Env};

#[test]
fn test_no_placeholders_round_trips() {
    let mut m = common::monitor("https://example.com/health?x=1");
    m.headers = vec![("Accept".into(), "application/json".into())];
    m.query_params = vec![("page".into(), "2".into())];
    m.body = Some("{\"plain\":true}".into());

    let env: Env = [("unused".to_string(), "value".to_string())].into_iter().collect();

    assert!(!has_placeholders(&m));
    assert_eq!(resolve(&m, &env), m);
}

#[test]
fn test_resolves_every_templated_field() {
    let mut m = common::monitor("https://{{host}}/users/{{ id }}");
    m.headers = vec![("Authorization".into(), "Token {{token}}".into())];
    m.query_params = vec![("{{key}}".into(), "{{value}}".into())];
    m.body = Some("{\"id\":\"{{id}}\",\"missing\":\"{{nope}}\"}".into());
    let original = m.clone();

    let env = merge_env([
        vec![("host".into(), "api.example.com".into()), ("token".into(), "global".into())],
        vec![("token".into(), "scoped".into()), ("id".into(), "7".into())],
        vec![("value".into(), "v".into())],
    ]);

    let resolved = resolve(&m, &env);

    assert_eq!(resolved.url, "https://api.example.com/users/7");
    assert_eq!(resolved.headers, vec![("Authorization".into(), "Token scoped".into())]);
    assert_eq!(resolved.query_params, vec![("{{key}}".into(), "v".into())]);
    assert_eq!(resolved.body.as_deref(), Some("{\"id\":\"7\",\"missing\":\"\"}"));
    assert_eq!(m, original, "input must not be mutated");
}

#[test]
fn test_placeholder_detection_covers_body_only() {
    let mut m = common::monitor("https://example.com");
    m.body = Some("{{payload}}".into());
    assert!(has_placeholders(&m));

    let resolved = resolve(&m, &Env::new());
    assert_eq!(resolved.body.as_deref(), Some(""));
}

