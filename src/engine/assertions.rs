//! Assertion evaluation against captured step results. Pure: no I/O, no state.

use std::borrow::Cow;

use serde_json::{json, Value};

use crate::model::{Assertion, AssertionKind, AssertionResult, CapturedResponse, StepResult, Verdict};

/// Evaluate one assertion against the response of the *last* step result.
///
/// When the last step produced no response the assertion fails without
/// inspecting its kind.
pub fn evaluate(assertion: &Assertion, step_results: &[StepResult]) -> AssertionResult {
    let mut result = AssertionResult {
        assertion_id: assertion.id.clone(),
        kind: assertion.kind.clone(),
        status: Verdict::Fail,
        expected: assertion.expected.clone(),
        actual: None,
        reasoning: String::new(),
    };

    let Some(response) = step_results.last().and_then(|s| s.response.as_ref()) else {
        result.reasoning = "No response available to evaluate".to_string();
        return result;
    };

    let expected = assertion.expected.as_ref();
    match &assertion.kind {
        AssertionKind::ResponseCode => response_code(&mut result, response, expected),
        AssertionKind::BodyContains => body_contains(&mut result, response, expected),
        AssertionKind::HeaderExists => header_exists(&mut result, response, expected),
        AssertionKind::JsonPath => {
            json_path(&mut result, response, assertion.target.as_deref(), expected)
        }
        AssertionKind::Unknown(name) => {
            result.reasoning = format!("Unknown assertion type: {}", name);
        }
    }
    result
}

fn response_code(result: &mut AssertionResult, response: &CapturedResponse, expected: Option<&Value>) {
    let code = response.status_code;
    result.actual = Some(json!(code));

    let matches = expected.and_then(Value::as_f64) == Some(f64::from(code));
    result.status = verdict(matches);
    result.reasoning = if matches {
        format!("Status code {} matches expected {}", code, render(expected))
    } else {
        format!("Expected status {}, got {}", render(expected), code)
    };
}

fn body_contains(result: &mut AssertionResult, response: &CapturedResponse, expected: Option<&Value>) {
    let Some(expected) = expected else {
        result.reasoning = "No expected text to search for".to_string();
        return;
    };
    let needle = render(Some(expected));
    let haystack = match &response.body {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };

    let found = haystack.contains(&needle);
    result.status = verdict(found);
    if found {
        result.actual = Some(json!(format!("Found \"{}\"", needle)));
        result.reasoning = format!("Response body contains \"{}\"", needle);
    } else {
        result.actual = Some(json!(format!("\"{}\" not in response", needle)));
        result.reasoning = format!("Response body does not contain \"{}\"", needle);
    }
}

fn header_exists(result: &mut AssertionResult, response: &CapturedResponse, expected: Option<&Value>) {
    let Some(expected) = expected else {
        result.reasoning = "No expected header name".to_string();
        return;
    };
    let name = render(Some(expected)).to_lowercase();

    let found = response.headers.keys().any(|k| k.eq_ignore_ascii_case(&name));
    result.status = verdict(found);
    if found {
        result.actual = Some(json!(format!("Header \"{}\" present", name)));
        result.reasoning = format!("Response header \"{}\" exists", name);
    } else {
        result.actual = Some(json!(format!("Header \"{}\" missing", name)));
        result.reasoning = format!("Response header \"{}\" not found", name);
    }
}

fn json_path(
    result: &mut AssertionResult,
    response: &CapturedResponse,
    path: Option<&str>,
    expected: Option<&Value>,
) {
    let path = path.unwrap_or_default();
    let resolved = resolve_path(&response.body, path);

    let matches = match (resolved.as_deref(), expected) {
        (Some(value), Some(expected)) => json_eq(value, expected),
        _ => false,
    };
    result.status = verdict(matches);
    result.reasoning = match resolved.as_deref() {
        Some(value) => format!("Path \"{}\" resolved to {}", path, value),
        None => format!("Path \"{}\" resolved to undefined", path),
    };
    result.actual = resolved.map(Cow::into_owned);
}

/// Walk a dot-separated path. Objects are stepped into by key, arrays by a
/// decimal index or `length`. An empty path yields the body itself; any
/// other step through a scalar or a missing key yields `None`.
pub fn resolve_path<'a>(body: &'a Value, path: &str) -> Option<Cow<'a, Value>> {
    if path.is_empty() {
        return Some(Cow::Borrowed(body));
    }

    let mut current = body;
    let mut segments = path.split('.').peekable();
    while let Some(key) = segments.next() {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) if key == "length" => {
                // A number has no members, so `length` must be the last segment.
                return segments
                    .peek()
                    .is_none()
                    .then(|| Cow::Owned(json!(items.len())));
            }
            Value::Array(items) => items.get(array_index(key)?)?,
            _ => return None,
        };
    }
    Some(Cow::Borrowed(current))
}

/// Canonical decimal index only: `"01"` and `"+1"` are not indexes.
fn array_index(key: &str) -> Option<usize> {
    key.parse::<usize>().ok().filter(|i| i.to_string() == key)
}

/// Structural equality where numbers compare by value, so `10` equals `10.0`.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| json_eq(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, l)| y.get(k).is_some_and(|r| json_eq(l, r)))
        }
        _ => a == b,
    }
}

fn verdict(pass: bool) -> Verdict {
    if pass {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}

/// Text form of an expected value: strings bare, everything else as JSON.
fn render(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "(unset)".to_string(),
    }
}
