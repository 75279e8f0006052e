//! `{{name}}` placeholder substitution over the templated monitor fields.

use std::collections::HashMap;
use std::sync::LazyLock;

use rand::Rng;
use regex::{Captures, Regex};

use crate::model::{Monitor, Tuples};

/// Flattened variable environment
pub type Env = HashMap<String, String>;

/// Builtin rendering a random integer in `[0, 10000)` unless shadowed by a variable.
pub const RANDOM_INT: &str = "RandomInt";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder pattern is valid")
});

/// Merge environment layers. Later layers win on name collision.
pub fn merge_env<I>(layers: I) -> Env
where
    I: IntoIterator<Item = Tuples>,
{
    let mut env = Env::new();
    for layer in layers {
        env.extend(layer);
    }
    env
}

fn contains_placeholder(value: &str) -> bool {
    value.contains("{{")
}

/// True if any templated field of `monitor` holds placeholder syntax.
pub fn has_placeholders(monitor: &Monitor) -> bool {
    contains_placeholder(&monitor.url)
        || monitor.headers.iter().any(|(_, v)| contains_placeholder(v))
        || monitor.query_params.iter().any(|(_, v)| contains_placeholder(v))
        || monitor.body.as_deref().is_some_and(contains_placeholder)
}

/// Render a single string against `env`. Unknown names render empty.
pub fn render(input: &str, env: &Env) -> String {
    if !contains_placeholder(input) {
        return input.to_string();
    }

    PLACEHOLDER
        .replace_all(input, |caps: &Captures<'_>| lookup(&caps[1], env))
        .into_owned()
}

fn lookup(name: &str, env: &Env) -> String {
    if let Some(value) = env.get(name) {
        return value.clone();
    }
    if name == RANDOM_INT {
        return rand::thread_rng().gen_range(0..10_000).to_string();
    }
    String::new()
}

fn render_values(tuples: &Tuples, env: &Env) -> Tuples {
    tuples.iter().map(|(k, v)| (k.clone(), render(v, env))).collect()
}

/// Return a copy of `monitor` with every placeholder in the url, header
/// values, query values and body substituted from `env`.
pub fn resolve(monitor: &Monitor, env: &Env) -> Monitor {
    if !has_placeholders(monitor) {
        return monitor.clone();
    }

    Monitor {
        url: render(&monitor.url, env),
        headers: render_values(&monitor.headers, env),
        query_params: render_values(&monitor.query_params, env),
        body: monitor.body.as_ref().map(|b| render(b, env)),
        ..monitor.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Env {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_render_whitespace_and_missing() {
        let vars = env(&[("host", "api.example.com")]);
        assert_eq!(render("https://{{ host }}/v1", &vars), "https://api.example.com/v1");
        assert_eq!(render("a{{missing}}b", &vars), "ab");
        assert_eq!(render("unterminated {{host", &vars), "unterminated {{host");
    }

    #[test]
    fn test_random_int_builtin() {
        let value: u32 = render("{{RandomInt}}", &Env::new()).parse().unwrap();
        assert!(value < 10_000);

        let shadowed = env(&[(RANDOM_INT, "7")]);
        assert_eq!(render("{{RandomInt}}", &shadowed), "7");
    }

    #[test]
    fn test_merge_env_later_layers_win() {
        let merged = merge_env(vec![
            vec![("a".into(), "global".into()), ("b".into(), "global".into())],
            vec![("b".into(), "named".into())],
            vec![("c".into(), "local".into())],
        ]);

        assert_eq!(merged["a"], "global");
        assert_eq!(merged["b"], "named");
        assert_eq!(merged["c"], "local");
    }
}
