//! Execution records: the mutable result of one scene run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::scene::AssertionKind;

/// Lifecycle of an execution. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Pass,
    Fail,
    Error,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Pass => write!(f, "pass"),
            ExecutionStatus::Fail => write!(f, "fail"),
            ExecutionStatus::Error => write!(f, "error"),
        }
    }
}

/// Outcome of a single step or assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn is_pass(self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FinalizeError {
    #[error("execution {id} already finalized as {status}")]
    AlreadyFinalized { id: String, status: ExecutionStatus },
    #[error("cannot finalize execution {id} as running")]
    NotTerminal { id: String },
}

/// One run of a scene. Created in `Running`, mutated in place as steps and
/// assertions complete, then frozen at a terminal status exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub id: String,
    pub scene_id: String,
    /// Denormalized scene title for display.
    pub scene_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Milliseconds between `started_at` and `completed_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    #[serde(default)]
    pub assertion_results: Vec<AssertionResult>,
    #[serde(default)]
    pub edge_cases_explored: Vec<EdgeCaseExploration>,
    /// Always empty; reserved.
    #[serde(default)]
    pub self_healing_actions: Vec<SelfHealingAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ExecutionResult {
    /// A fresh record in the `Running` state, stamped now.
    pub fn new(scene_id: impl Into<String>, scene_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scene_id: scene_id.into(),
            scene_name: scene_name.into(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration: None,
            step_results: Vec::new(),
            assertion_results: Vec::new(),
            edge_cases_explored: Vec::new(),
            self_healing_actions: Vec::new(),
            reasoning: None,
        }
    }

    /// Move to a terminal status, stamping completion time and duration.
    pub fn finalize(
        &mut self,
        status: ExecutionStatus,
        reasoning: impl Into<String>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), FinalizeError> {
        if self.status.is_terminal() {
            return Err(FinalizeError::AlreadyFinalized {
                id: self.id.clone(),
                status: self.status,
            });
        }
        if !status.is_terminal() {
            return Err(FinalizeError::NotTerminal { id: self.id.clone() });
        }

        self.status = status;
        self.completed_at = Some(completed_at);
        self.duration = Some((completed_at - self.started_at).num_milliseconds().max(0) as u64);
        self.reasoning = Some(reasoning.into());
        Ok(())
    }
}

/// What was actually sent for a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// What came back for a step. Body is structured JSON when the content type
/// said so and it parsed, otherwise a JSON string holding the raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub description: String,
    pub status: Verdict,
    /// Milliseconds, including any configured pre-request delay.
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<CapturedRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CapturedResponse>,
    /// Size in bytes of the serialized response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub assertion_id: String,
    #[serde(rename = "type")]
    pub kind: AssertionKind,
    pub status: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    /// Absent when the assertion could not resolve a value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplorationOutcome {
    Pass,
    Fail,
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeCaseExploration {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub result: ExplorationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfHealingAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_running() {
        let exec = ExecutionResult::new("scene_1", "Users");
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert!(exec.completed_at.is_none());
        assert!(exec.duration.is_none());
        assert!(exec.step_results.is_empty());
    }

    #[test]
    fn test_finalize_sets_duration_from_timestamps() {
        let mut exec = ExecutionResult::new("scene_1", "Users");
        let done = exec.started_at + chrono::Duration::milliseconds(1500);
        exec.finalize(ExecutionStatus::Pass, "ok", done).unwrap();

        assert_eq!(exec.status, ExecutionStatus::Pass);
        assert_eq!(exec.completed_at, Some(done));
        assert_eq!(exec.duration, Some(1500));
        assert_eq!(exec.reasoning.as_deref(), Some("ok"));
    }

    #[test]
    fn test_finalize_only_once() {
        let mut exec = ExecutionResult::new("scene_1", "Users");
        exec.finalize(ExecutionStatus::Fail, "first", Utc::now()).unwrap();

        let err = exec
            .finalize(ExecutionStatus::Pass, "second", Utc::now())
            .unwrap_err();
        assert!(matches!(err, FinalizeError::AlreadyFinalized { status: ExecutionStatus::Fail, .. }));
        assert_eq!(exec.status, ExecutionStatus::Fail);
        assert_eq!(exec.reasoning.as_deref(), Some("first"));
    }

    #[test]
    fn test_finalize_rejects_running() {
        let mut exec = ExecutionResult::new("scene_1", "Users");
        let err = exec
            .finalize(ExecutionStatus::Running, "nope", Utc::now())
            .unwrap_err();
        assert!(matches!(err, FinalizeError::NotTerminal { .. }));
        assert_eq!(exec.status, ExecutionStatus::Running);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let exec = ExecutionResult::new("adhoc", "Ad-hoc Execution");
        let json = serde_json::to_value(&exec).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["sceneName"], "Ad-hoc Execution");
        assert!(json.get("completedAt").is_none());
    }
}
