//! RigourQA -- declarative HTTP API scene testing.
//!
//! A scene is an ordered list of HTTP steps plus assertions over the last
//! response. This crate stores scenes and target connections, executes
//! scenes against a connection in the background, and serves the results
//! over a JSON API.

pub mod api;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod model;
pub mod probes;
pub mod service;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;

use crate::config::{EngineConfig, RigourConfig};
use crate::engine::{EngineError, Orchestrator, StepRunner};
use crate::service::ExecutionService;
use crate::storage::{ConnectionStore, ResultStore, SceneStore};

/// Build an orchestrator over `store` using the engine settings.
pub fn build_orchestrator(store: ResultStore, engine: &EngineConfig) -> Result<Orchestrator, EngineError> {
    let runner = StepRunner::new()?;
    Ok(Orchestrator::new(store, runner)
        .with_default_timeout_ms(engine.default_timeout_ms)
        .with_user_agent(engine.user_agent.clone()))
}

/// Start the RigourQA service: storage, execution service and API server.
///
/// Runs until Ctrl-C, then waits for in-flight executions before returning.
pub async fn serve(config: RigourConfig) -> Result<()> {
    // 1. Initialize Storage
    let db_path = config.storage.db_path.to_string_lossy().into_owned();
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(&db_path)?;

    let scenes = SceneStore::new(pool.clone());
    let connections = ConnectionStore::new(pool.clone());
    if config.storage.seed_demo && storage::seed::seed_demo(&scenes, &connections)? {
        tracing::info!("seeded demo scene and connection");
    }
    let results = ResultStore::open(Some(pool))?;

    // 2. Initialize Execution Service
    let orchestrator = build_orchestrator(results, &config.engine)?;
    let executions = ExecutionService::new(orchestrator, scenes.clone(), connections.clone())
        .with_pick_first_connection(config.engine.pick_first_connection);

    // 3. Start API Server
    let state = api::state::AppState {
        scenes,
        connections,
        executions: executions.clone(),
        probe: Arc::new(probes::HttpProbe::new()?),
    };
    let addr: std::net::SocketAddr = config.server.bind.parse()?;
    let app = api::router(state);

    tracing::info!(%addr, "RigourQA listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 4. Drain executions
    executions.shutdown().await;
    tracing::info!("RigourQA stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
