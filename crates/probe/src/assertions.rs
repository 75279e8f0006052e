//! Assertion evaluation against a finished [`MonitorResult`].
//!
//! Evaluation never fails as a whole: every problem (missing header,
//! unparsable body, bad pattern) becomes the failure text of the assertion
//! that hit it.

use regex::Regex;
use serde_json::Value;
use serde_json_path::JsonPath;

use crate::model::{
    Assertion, AssertionResult, MonitorResult, Operator, Subject, ERR_ASSERTIONS,
};

/// Longest failure description kept on an [`AssertionResult`]
pub const MAX_FAIL_LEN: usize = 256;

const JSON_BODY_FAILURE: &str = "unable to evaluate json body";

enum Received {
    Number(f64),
    Text(String),
}

fn extract(subject: &Subject, result: &MonitorResult) -> Result<Received, String> {
    match subject {
        Subject::Code => Ok(Received::Number(f64::from(result.code))),
        Subject::TotalTime => Ok(Received::Number(result.timings.total as f64)),
        Subject::CertExpiryDays => result
            .cert_expiry_days
            .map(|days| Received::Number(days as f64))
            .ok_or_else(|| "certificate not available".to_string()),
        Subject::Header { name } => result
            .header(name)
            .map(|value| Received::Text(value.to_string()))
            .ok_or_else(|| "header not found".to_string()),
        Subject::Body => Ok(Received::Text(result.body.clone())),
        Subject::JsonBody { name } => json_value(&result.body, name)
            .map(Received::Text)
            .ok_or_else(|| JSON_BODY_FAILURE.to_string()),
    }
}

/// Select `path` from `body` and render it as comparison text. A string
/// match is used verbatim, anything else as its JSON encoding.
fn json_value(body: &str, path: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    let path = JsonPath::parse(path).ok()?;
    let nodes = path.query(&json).all();

    match nodes.as_slice() {
        [] => None,
        [Value::String(s)] => Some(s.clone()),
        [single] => Some(single.to_string()),
        many => Some(Value::Array(many.iter().map(|v| (*v).clone()).collect()).to_string()),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn describe(received: &str) -> String {
    if received.is_empty() {
        "received an empty value".to_string()
    } else {
        received.to_string()
    }
}

fn compare_number(received: f64, op: Operator, expected: &str) -> Result<(), String> {
    let shown = format_number(received);

    let holds = match (op, expected.trim().parse::<f64>()) {
        (Operator::Contains | Operator::Matches, _) => {
            return Err(format!("{op} does not apply to numeric value {shown}"));
        }
        (_, Err(_)) => {
            return Err(format!("{shown} (expected value {expected:?} is not a number)"));
        }
        (Operator::Eq, Ok(target)) => received == target,
        (Operator::Ne, Ok(target)) => received != target,
        (Operator::Gt, Ok(target)) => received > target,
        (Operator::Lt, Ok(target)) => received < target,
    };

    if holds { Ok(()) } else { Err(shown) }
}

fn compare_text(received: &str, op: Operator, expected: &str) -> Result<(), String> {
    let holds = match op {
        Operator::Contains => received.contains(expected),
        Operator::Matches => match Regex::new(expected) {
            Ok(pattern) => pattern.is_match(received),
            Err(_) => return Err(format!("invalid pattern {expected:?}")),
        },
        Operator::Eq => received == expected,
        Operator::Ne => received != expected,
        Operator::Gt | Operator::Lt => {
            let ordering = match (received.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
                (Ok(a), Ok(b)) => a.partial_cmp(&b),
                _ => Some(received.cmp(expected)),
            };
            match (op, ordering) {
                (Operator::Gt, Some(o)) => o.is_gt(),
                (Operator::Lt, Some(o)) => o.is_lt(),
                _ => false,
            }
        }
    };

    if holds { Ok(()) } else { Err(describe(received)) }
}

fn truncate(mut text: String) -> String {
    if let Some((idx, _)) = text.char_indices().nth(MAX_FAIL_LEN) {
        text.truncate(idx);
    }
    text
}

/// Evaluate a single assertion
pub fn evaluate_one(assertion: &Assertion, result: &MonitorResult) -> AssertionResult {
    let outcome = extract(&assertion.subject, result).and_then(|received| match received {
        Received::Number(n) => compare_number(n, assertion.op, &assertion.value),
        Received::Text(s) => compare_text(&s, assertion.op, &assertion.value),
    });

    AssertionResult { assertion: assertion.clone(), fail: outcome.err().map(truncate) }
}

pub fn evaluate(assertions: &[Assertion], result: &MonitorResult) -> Vec<AssertionResult> {
    assertions.iter().map(|a| evaluate_one(a, result)).collect()
}

/// Evaluate `assertions` into `result`.
///
/// Skipped when the attempt already failed or there is nothing to check.
/// Otherwise stores the per-assertion results and sets `err` to
/// [`ERR_ASSERTIONS`] if any of them failed.
pub fn apply(result: &mut MonitorResult, assertions: &[Assertion]) {
    if !result.err.is_empty() || assertions.is_empty() {
        return;
    }

    result.assert_results = evaluate(assertions, result);
    if result.assert_results.iter().any(|a| !a.passed()) {
        result.err = ERR_ASSERTIONS.to_string();
    }
}

/// One line per failed assertion, for notification messages.
pub fn format_failures(result: &MonitorResult) -> String {
    result
        .assert_results
        .iter()
        .filter_map(|a| {
            let fail = a.fail.as_ref()?;
            let assertion = &a.assertion;
            let subject = match assertion.subject.name().filter(|n| !n.is_empty()) {
                Some(name) => format!("{} {name}", assertion.subject.kind()),
                None => assertion.subject.kind().to_string(),
            };
            Some(format!("{subject} {} {} failed with: {fail}", assertion.op, assertion.value))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_on_char_boundary() {
        let long = "é".repeat(300);
        let cut = truncate(long);
        assert_eq!(cut.chars().count(), MAX_FAIL_LEN);
    }

    #[test]
    fn test_json_value_rendering() {
        let body = r#"{"a":{"b":"text","n":3,"list":[1,2]}}"#;
        assert_eq!(json_value(body, "$.a.b").as_deref(), Some("text"));
        assert_eq!(json_value(body, "$.a.n").as_deref(), Some("3"));
        assert_eq!(json_value(body, "$.a.list").as_deref(), Some("[1,2]"));
        assert_eq!(json_value(body, "$.a.list[*]").as_deref(), Some("[1,2]"));
        assert_eq!(json_value(body, "$.missing"), None);
        assert_eq!(json_value("not json", "$.a"), None);
        assert_eq!(json_value(body, "not a path"), None);
    }

    #[test]
    fn test_text_ordering_prefers_numbers() {
        assert!(compare_text("10", Operator::Gt, "9").is_ok());
        assert!(compare_text("b", Operator::Gt, "a").is_ok());
        assert_eq!(compare_text("", Operator::Eq, "x").unwrap_err(), "received an empty value");
    }
}
