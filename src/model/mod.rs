//! Record types shared by the engine, the stores, and the API layer.
//!
//! Field names serialize in camelCase so stored JSON and API payloads share
//! one shape.

pub mod connection;
pub mod execution;
pub mod scene;

pub use self::connection::{AuthType, Connection, Environment};
pub use self::execution::{
    AssertionResult, CapturedRequest, CapturedResponse, EdgeCaseExploration, ExecutionResult,
    ExecutionStatus, ExplorationOutcome, SelfHealingAction, StepResult, Verdict,
};
pub use self::scene::{Assertion, AssertionKind, EdgeCaseHint, LastRunStatus, Probability, Scene, Step};

/// Aggregate numbers for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_scenes: usize,
    pub total_executions: usize,
    /// Fraction of completed runs that passed, two decimals.
    pub pass_rate: f64,
    pub edge_cases_found: usize,
    pub self_healed_count: usize,
    /// Mean duration of completed runs in milliseconds.
    pub average_execution_time: u64,
}
