//! Step runner: issues one HTTP request and captures what happened.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::EngineError;
use crate::model::{CapturedRequest, CapturedResponse, Step, StepResult, Verdict};

/// Why a step could not produce a response.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("request timed out after {0}ms")]
    Timeout(u128),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),
    #[error("invalid step header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

impl StepError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            StepError::Timeout(timeout.as_millis())
        } else {
            StepError::Transport(error_chain(&err))
        }
    }
}

/// `Display` of an error followed by each of its sources.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !msg.contains(&text) {
            msg.push_str(": ");
            msg.push_str(&text);
        }
        source = cause.source();
    }
    msg
}

/// Runs steps over a shared HTTP client.
#[derive(Clone)]
pub struct StepRunner {
    client: Client,
}

impl StepRunner {
    pub fn new() -> Result<Self, EngineError> {
        let client = Client::builder()
            .build()
            .map_err(|e| EngineError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Execute `step` and return its result. Never fails: transport errors,
    /// timeouts and 5xx responses all come back as a failed `StepResult`.
    ///
    /// Duration is measured from before the optional delay until the body
    /// has been read, so any configured delay is charged to the step.
    pub async fn run_step(
        &self,
        step: &Step,
        base_url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> StepResult {
        let started = Instant::now();
        let method = step.method();
        let url = resolve_url(base_url, step.url.as_deref());
        let description = if step.description.trim().is_empty() {
            format!("{} {}", method, step.url.as_deref().unwrap_or_default())
        } else {
            step.description.clone()
        };

        let mut result = StepResult {
            step_id: step.id.clone(),
            description,
            status: Verdict::Pass,
            duration: 0,
            request: None,
            response: None,
            response_size: None,
            error: None,
        };

        let outcome = match merge_step_headers(headers, step.headers.as_ref()) {
            Ok(merged) => {
                result.request = Some(CapturedRequest {
                    method: method.clone(),
                    url: url.clone(),
                    headers: capture_headers(&merged),
                    body: step.body.clone(),
                });
                self.send(step, &method, &url, merged, timeout).await
            }
            Err(e) => {
                result.request = Some(CapturedRequest {
                    method: method.clone(),
                    url: url.clone(),
                    headers: capture_headers(headers),
                    body: step.body.clone(),
                });
                Err(e)
            }
        };

        match outcome {
            Ok((response, size)) => {
                if response.status_code >= 500 {
                    result.status = Verdict::Fail;
                    result.error = Some(format!("Server error: HTTP {}", response.status_code));
                }
                result.response_size = Some(size);
                result.response = Some(response);
            }
            Err(e) => {
                result.status = Verdict::Fail;
                result.error = Some(e.to_string());
            }
        }
        result.duration = started.elapsed().as_millis() as u64;

        if result.status.is_pass() {
            debug!(step_id = %step.id, %method, %url, duration_ms = result.duration, "step passed");
        } else {
            warn!(
                step_id = %step.id,
                %method,
                %url,
                duration_ms = result.duration,
                error = result.error.as_deref().unwrap_or_default(),
                "step failed"
            );
        }
        result
    }

    async fn send(
        &self,
        step: &Step,
        method: &str,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<(CapturedResponse, u64), StepError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| StepError::InvalidMethod(method.to_string()))?;

        if let Some(delay) = step.delay.filter(|d| *d > 0) {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let sends_body = method != Method::GET && method != Method::HEAD;
        let mut request = self
            .client
            .request(method, url)
            .headers(headers)
            .timeout(timeout);
        if let Some(body) = step.body.as_ref().filter(|_| sends_body) {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StepError::from_reqwest(e, timeout))?;

        let status_code = response.status().as_u16();
        let response_headers = capture_headers(response.headers());
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StepError::from_reqwest(e, timeout))?;
        let body = decode_body(&bytes, is_json);
        let size = body_size(&body);

        Ok((
            CapturedResponse {
                status_code,
                headers: response_headers,
                body,
            },
            size,
        ))
    }
}

/// Resolve a step URL against the connection base URL.
///
/// URLs with a scheme are used verbatim. Relative URLs are joined to the base
/// with exactly one `/`. A missing or empty step URL yields the base URL.
pub fn resolve_url(base_url: &str, step_url: Option<&str>) -> String {
    let step_url = match step_url {
        Some(u) if !u.is_empty() => u,
        _ => return base_url.to_string(),
    };
    if has_scheme(step_url) {
        return step_url.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        step_url.trim_start_matches('/')
    )
}

fn has_scheme(url: &str) -> bool {
    match url.split_once("://") {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Overlay per-step headers on the shared set.
fn merge_step_headers(
    base: &HeaderMap,
    step_headers: Option<&BTreeMap<String, String>>,
) -> Result<HeaderMap, StepError> {
    let mut merged = base.clone();
    for (name, value) in step_headers.into_iter().flatten() {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| StepError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| StepError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        merged.insert(header_name, header_value);
    }
    Ok(merged)
}

/// Flatten a header map; repeated names are joined with `", "`.
pub(crate) fn capture_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut captured: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        captured
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    captured
}

fn decode_body(bytes: &[u8], is_json: bool) -> Value {
    if is_json {
        if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
            return value;
        }
    }
    Value::String(String::from_utf8_lossy(bytes).into_owned())
}

/// Byte length of the body as text: raw text as-is, structured bodies
/// re-serialized.
fn body_size(body: &Value) -> u64 {
    match body {
        Value::String(text) => text.len() as u64,
        other => serde_json::to_vec(other).map(|v| v.len() as u64).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_absolute_url_verbatim() {
        assert_eq!(
            resolve_url("https://api.example.com", Some("http://other.test/x")),
            "http://other.test/x"
        );
        assert_eq!(
            resolve_url("", Some("https://jsonplaceholder.typicode.com/users")),
            "https://jsonplaceholder.typicode.com/users"
        );
    }

    #[test]
    fn test_resolve_relative_url_single_slash() {
        let base = "https://api.example.com";
        assert_eq!(resolve_url(base, Some("/users")), "https://api.example.com/users");
        assert_eq!(resolve_url(base, Some("users")), "https://api.example.com/users");
        assert_eq!(
            resolve_url("https://api.example.com/", Some("/users")),
            "https://api.example.com/users"
        );
    }

    #[test]
    fn test_resolve_missing_step_url_uses_base() {
        assert_eq!(resolve_url("https://api.example.com", None), "https://api.example.com");
        assert_eq!(resolve_url("https://api.example.com", Some("")), "https://api.example.com");
    }

    #[test]
    fn test_path_named_like_a_scheme_is_relative() {
        // "httpbin" starts with "http" but has no scheme separator.
        assert_eq!(
            resolve_url("https://api.example.com", Some("httpbin/get")),
            "https://api.example.com/httpbin/get"
        );
    }

    #[test]
    fn test_merge_step_headers_overrides() {
        let mut base = HeaderMap::new();
        base.insert("x-env", HeaderValue::from_static("dev"));
        base.insert("accept", HeaderValue::from_static("*/*"));

        let mut step = BTreeMap::new();
        step.insert("X-Env".to_string(), "staging".to_string());

        let merged = merge_step_headers(&base, Some(&step)).unwrap();
        assert_eq!(merged.get("x-env").unwrap(), "staging");
        assert_eq!(merged.get("accept").unwrap(), "*/*");
    }

    #[test]
    fn test_merge_step_headers_rejects_bad_name() {
        let mut step = BTreeMap::new();
        step.insert("bad header".to_string(), "v".to_string());
        let err = merge_step_headers(&HeaderMap::new(), Some(&step)).unwrap_err();
        assert!(matches!(err, StepError::InvalidHeader { .. }));
    }

    #[test]
    fn test_decode_body_falls_back_to_text() {
        assert_eq!(decode_body(br#"{"a":1}"#, true), json!({ "a": 1 }));
        assert_eq!(decode_body(b"not json", true), json!("not json"));
        assert_eq!(decode_body(br#"{"a":1}"#, false), json!(r#"{"a":1}"#));
    }

    #[test]
    fn test_body_size() {
        assert_eq!(body_size(&json!("hello")), 5);
        assert_eq!(body_size(&json!({ "a": 1 })), 7);
    }
}
