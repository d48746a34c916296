//! Scene definitions: ordered HTTP steps plus assertions over the last response.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named, ordered test definition. Read-only while an execution runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_actor")]
    pub actor: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_cases: Option<Vec<EdgeCaseHint>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<LastRunStatus>,
}

pub(crate) fn default_actor() -> String {
    "api_client".to_string()
}

/// Status of the most recent run, denormalized onto the scene for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LastRunStatus {
    Running,
    Pass,
    Fail,
    Error,
}

impl From<super::ExecutionStatus> for LastRunStatus {
    fn from(status: super::ExecutionStatus) -> Self {
        match status {
            super::ExecutionStatus::Running => LastRunStatus::Running,
            super::ExecutionStatus::Pass => LastRunStatus::Pass,
            super::ExecutionStatus::Fail => LastRunStatus::Fail,
            super::ExecutionStatus::Error => LastRunStatus::Error,
        }
    }
}

/// One HTTP request definition within a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// HTTP method; `GET` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Absolute URL, or a path resolved against the connection base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Merged over the connection's default headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Think-time before the request, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

impl Step {
    /// Upper-cased method name, defaulting to `GET`.
    pub fn method(&self) -> String {
        match self.method.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m.to_uppercase(),
            _ => "GET".to_string(),
        }
    }
}

/// A typed predicate checked against the most recent captured response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AssertionKind,
    /// Dot-path for `json_path`; informational for the other kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

/// Assertion discriminant. Unrecognised names are kept so they can be
/// reported back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssertionKind {
    ResponseCode,
    BodyContains,
    HeaderExists,
    JsonPath,
    Unknown(String),
}

impl AssertionKind {
    pub fn as_str(&self) -> &str {
        match self {
            AssertionKind::ResponseCode => "response_code",
            AssertionKind::BodyContains => "body_contains",
            AssertionKind::HeaderExists => "header_exists",
            AssertionKind::JsonPath => "json_path",
            AssertionKind::Unknown(other) => other,
        }
    }
}

impl From<String> for AssertionKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "response_code" => AssertionKind::ResponseCode,
            "body_contains" => AssertionKind::BodyContains,
            "header_exists" => AssertionKind::HeaderExists,
            "json_path" => AssertionKind::JsonPath,
            _ => AssertionKind::Unknown(value),
        }
    }
}

impl From<AssertionKind> for String {
    fn from(kind: AssertionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for AssertionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared exploration target. Only recorded, never fuzzed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeCaseHint {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub probability: Probability,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Probability {
    Low,
    #[default]
    Medium,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_method_defaults_to_get() {
        let step: Step = serde_json::from_value(json!({ "id": "s1" })).unwrap();
        assert_eq!(step.method(), "GET");

        let step: Step = serde_json::from_value(json!({ "id": "s1", "method": "post" })).unwrap();
        assert_eq!(step.method(), "POST");
    }

    #[test]
    fn test_unknown_assertion_kind_is_preserved() {
        let a: Assertion =
            serde_json::from_value(json!({ "id": "a1", "type": "latency_below", "expected": 5 }))
                .unwrap();
        assert_eq!(a.kind, AssertionKind::Unknown("latency_below".to_string()));

        let back = serde_json::to_value(&a).unwrap();
        assert_eq!(back["type"], "latency_below");
    }

    #[test]
    fn test_scene_minimal_json_fills_defaults() {
        let scene: Scene =
            serde_json::from_value(json!({ "id": "scene_1", "title": "Users" })).unwrap();
        assert_eq!(scene.actor, "api_client");
        assert!(scene.steps.is_empty());
        assert!(scene.assertions.is_empty());
        assert!(scene.edge_cases.is_none());
        assert!(scene.last_run_status.is_none());
    }
}
