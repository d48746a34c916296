//! Scene execution engine -- step runner, assertion evaluator, orchestrator.
//!
//! The orchestrator drives one execution record from `running` to a terminal
//! status. Steps run strictly in order; assertions are evaluated once, after
//! the last step, against the most recent response.

pub mod assertions;
pub mod explore;
pub mod orchestrator;
pub mod runner;
pub mod summary;

pub use self::assertions::evaluate;
pub use self::explore::{DeferredExplorer, EdgeCaseExplorer};
pub use self::orchestrator::{resolve_headers, Orchestrator};
pub use self::runner::{resolve_url, StepRunner};

use thiserror::Error;

use crate::model::execution::FinalizeError;
use crate::storage::StoreError;

/// Fallback request timeout when the connection does not set one.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// User-agent sent with every step request.
pub const DEFAULT_USER_AGENT: &str = concat!("RigourQA/", env!("CARGO_PKG_VERSION"));

/// Failures of the orchestration itself. Any of these ends a run in `error`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("result store: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("execution task panicked: {0}")]
    Panicked(String),
}
