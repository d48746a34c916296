//! Execution orchestrator: owns the `running -> pass | fail | error` state
//! machine for one execution record.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use tracing::{debug, error, info};

use super::assertions::evaluate;
use super::explore::{DeferredExplorer, EdgeCaseExplorer};
use super::runner::StepRunner;
use super::summary::{self, RunTally};
use super::{EngineError, DEFAULT_TIMEOUT_MS, DEFAULT_USER_AGENT};
use crate::model::{AuthType, Connection, ExecutionStatus, Scene};
use crate::storage::ResultStore;

/// Drives executions whose records already live in a [`ResultStore`].
#[derive(Clone)]
pub struct Orchestrator {
    store: ResultStore,
    runner: StepRunner,
    explorer: Arc<dyn EdgeCaseExplorer>,
    default_timeout_ms: u64,
    user_agent: String,
}

impl Orchestrator {
    pub fn new(store: ResultStore, runner: StepRunner) -> Self {
        Self {
            store,
            runner,
            explorer: Arc::new(DeferredExplorer),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_explorer(mut self, explorer: Arc<dyn EdgeCaseExplorer>) -> Self {
        self.explorer = explorer;
        self
    }

    /// Timeout used when the connection does not set one.
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Run `scene` against `connection`, publishing progress into the
    /// `running` record `execution_id`.
    ///
    /// Never returns an error. Step and assertion failures end the run in
    /// `fail`; anything that breaks the orchestration itself, including a
    /// panic, ends it in `error` with the message as reasoning.
    pub async fn run(&self, execution_id: &str, scene: Option<&Scene>, connection: Option<&Connection>) {
        let outcome = AssertUnwindSafe(self.execute(execution_id, scene, connection))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(status)) => {
                info!(execution_id, %status, "execution finished");
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => EngineError::Panicked(panic_message(panic.as_ref())).to_string(),
        };

        error!(execution_id, error = %failure, "execution aborted");
        let reasoning = summary::fatal(&failure);
        match self
            .store
            .update(execution_id, |record| {
                record.finalize(ExecutionStatus::Error, reasoning, Utc::now())
            })
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(execution_id, error = %e, "execution already finalized"),
            Err(e) => error!(execution_id, error = %e, "failed to record execution error"),
        }
    }

    async fn execute(
        &self,
        execution_id: &str,
        scene: Option<&Scene>,
        connection: Option<&Connection>,
    ) -> Result<ExecutionStatus, EngineError> {
        let headers = resolve_headers(connection, &self.user_agent)?;
        let base_url = connection.map(|c| c.base_url.as_str()).unwrap_or_default();
        let timeout = Duration::from_millis(
            connection
                .and_then(|c| c.timeout)
                .filter(|t| *t > 0)
                .unwrap_or(self.default_timeout_ms),
        );
        let steps = scene.map(|s| s.steps.as_slice()).unwrap_or_default();
        let assertions = scene.map(|s| s.assertions.as_slice()).unwrap_or_default();

        info!(
            execution_id,
            steps = steps.len(),
            assertions = assertions.len(),
            base_url,
            timeout_ms = timeout.as_millis() as u64,
            "execution started"
        );

        let mut step_results = Vec::with_capacity(steps.len());
        for step in steps {
            let result = self.runner.run_step(step, base_url, &headers, timeout).await;
            let published = result.clone();
            self.store
                .update(execution_id, move |record| record.step_results.push(published))
                .await?;
            step_results.push(result);
        }

        let mut assertion_results = Vec::with_capacity(assertions.len());
        for assertion in assertions {
            let result = evaluate(assertion, &step_results);
            debug!(
                execution_id,
                assertion_id = %assertion.id,
                kind = %assertion.kind,
                status = ?result.status,
                reasoning = %result.reasoning,
                "assertion evaluated"
            );
            let published = result.clone();
            self.store
                .update(execution_id, move |record| record.assertion_results.push(published))
                .await?;
            assertion_results.push(result);
        }

        if let (Some(hints), Some(connection)) = (scene.and_then(|s| s.edge_cases.as_ref()), connection) {
            for hint in hints {
                let found = self.explorer.explore(hint, connection).await;
                self.store
                    .update(execution_id, move |record| record.edge_cases_explored.push(found))
                    .await?;
            }
        }

        let tally = RunTally::new(steps.len(), assertions.len(), &step_results, &assertion_results);
        let (status, reasoning) = if tally.all_passed() {
            (ExecutionStatus::Pass, summary::passed(&tally))
        } else {
            (ExecutionStatus::Fail, summary::failed(&tally))
        };

        self.store
            .update(execution_id, |record| record.finalize(status, reasoning, Utc::now()))
            .await??;
        Ok(status)
    }
}

/// Headers shared by every step: JSON content type, user agent, the
/// connection's defaults, then the auth header for `bearer` / `api_key`.
pub fn resolve_headers(
    connection: Option<&Connection>,
    user_agent: &str,
) -> Result<HeaderMap, EngineError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, header_value("User-Agent", user_agent)?);

    let Some(connection) = connection else {
        return Ok(headers);
    };

    for (name, value) in &connection.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| EngineError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        headers.insert(header_name, header_value(name, value)?);
    }

    match (connection.auth_type, connection.token()) {
        (AuthType::Bearer, Some(token)) => {
            headers.insert(
                AUTHORIZATION,
                header_value("Authorization", &format!("Bearer {}", token))?,
            );
        }
        (AuthType::ApiKey, Some(token)) => {
            headers.insert(HeaderName::from_static("x-api-key"), header_value("X-API-Key", token)?);
        }
        _ => {}
    }

    Ok(headers)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, EngineError> {
    HeaderValue::from_str(value).map_err(|e| EngineError::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
