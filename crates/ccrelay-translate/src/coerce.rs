//! Parameter type coercion — XML carries only strings, clients expect the
//! JSON types their schemas declared. Booleans always coerce; digit-shaped
//! values consult an ordered rule table keyed by tool and parameter name.

use regex::Regex;
use serde_json::{Number, Value};
use std::sync::LazyLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoercionKind {
    /// Declared numeric — parse silently.
    KnownNumeric,
    /// Declared string — digits stay text, but that is surprising enough
    /// to log.
    KnownString,
    /// No declaration — parse as number and log the guess.
    Unknown,
}

pub struct CoercionRule {
    tool: Regex,
    param: &'static str,
    kind: CoercionKind,
}

static NUMERIC_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("numeric shape regex"));

/// Parameters that are numeric for every tool.
const NUMERIC_PARAMS: &[&str] = &[
    "offset", "limit", "timeout", "port", "line", "count", "size", "length", "index", "number",
    "num",
];

/// Parameters that stay strings for every tool, digits or not.
const STRING_PARAMS: &[&str] = &["id", "file_path", "path", "name", "description"];

static DEFAULT_RULES: LazyLock<Vec<CoercionRule>> = LazyLock::new(|| {
    let any_tool = || Regex::new(".*").expect("match-all regex");
    let mut rules = Vec::with_capacity(NUMERIC_PARAMS.len() + STRING_PARAMS.len());
    for param in NUMERIC_PARAMS {
        rules.push(CoercionRule {
            tool: any_tool(),
            param,
            kind: CoercionKind::KnownNumeric,
        });
    }
    for param in STRING_PARAMS {
        rules.push(CoercionRule {
            tool: any_tool(),
            param,
            kind: CoercionKind::KnownString,
        });
    }
    rules
});

/// First matching rule wins; no rule means [`CoercionKind::Unknown`].
pub fn lookup_kind(tool: &str, param: &str) -> CoercionKind {
    DEFAULT_RULES
        .iter()
        .find(|rule| rule.param == param && rule.tool.is_match(tool))
        .map(|rule| rule.kind)
        .unwrap_or(CoercionKind::Unknown)
}

/// Coerce one extracted parameter value.
pub fn coerce_value(tool: &str, param: &str, raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if !NUMERIC_SHAPE.is_match(raw) {
        return Value::String(raw.to_string());
    }

    match lookup_kind(tool, param) {
        CoercionKind::KnownNumeric => parse_number(raw),
        CoercionKind::KnownString => {
            warn!(tool, param, value = raw, "numeric-shaped value kept as string per rule");
            Value::String(raw.to_string())
        }
        CoercionKind::Unknown => {
            warn!(tool, param, value = raw, "no coercion rule, guessing numeric");
            parse_number(raw)
        }
    }
}

fn parse_number(raw: &str) -> Value {
    if raw.contains('.') {
        return raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string()));
    }
    match raw.parse::<i64>() {
        Ok(n) => Value::Number(Number::from(n)),
        // wider than i64 — keep the digits as text rather than losing them
        Err(_) => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn booleans_always_coerce() {
        assert_eq!(coerce_value("Any", "whatever", "true"), json!(true));
        assert_eq!(coerce_value("Any", "whatever", "FALSE"), json!(false));
        assert_eq!(coerce_value("Any", "whatever", "True"), json!(true));
    }

    #[test]
    fn known_numeric_params_parse() {
        assert_eq!(coerce_value("Read", "limit", "42"), json!(42));
        assert_eq!(coerce_value("Serve", "port", "8080"), json!(8080));
        assert_eq!(coerce_value("Wait", "timeout", "2.5"), json!(2.5));
        assert_eq!(coerce_value("Seek", "offset", "-10"), json!(-10));
    }

    #[test]
    fn known_string_params_stay_strings() {
        assert_eq!(coerce_value("Get", "id", "42"), json!("42"));
        assert_eq!(coerce_value("Read", "path", "123"), json!("123"));
        assert_eq!(coerce_value("Label", "name", "007"), json!("007"));
    }

    #[test]
    fn unknown_params_guess_numeric() {
        assert_eq!(lookup_kind("Count", "widget_count"), CoercionKind::Unknown);
        assert_eq!(coerce_value("Count", "widget_count", "42"), json!(42));
    }

    #[test]
    fn non_numeric_strings_pass_through() {
        assert_eq!(coerce_value("Read", "limit", "lots"), json!("lots"));
        assert_eq!(coerce_value("Read", "limit", "1.2.3"), json!("1.2.3"));
        assert_eq!(coerce_value("Read", "limit", "42 "), json!("42 "));
    }

    #[test]
    fn rules_are_tool_agnostic() {
        assert_eq!(lookup_kind("AnythingAtAll", "limit"), CoercionKind::KnownNumeric);
        assert_eq!(lookup_kind("AnythingAtAll", "file_path"), CoercionKind::KnownString);
    }

    #[test]
    fn i64_overflow_keeps_digits_as_text() {
        assert_eq!(
            coerce_value("Big", "count", "99999999999999999999"),
            json!("99999999999999999999")
        );
    }
}
