//! Execution service: the "begin execution" entry point.
//!
//! Resolves the scene and connection, registers a `running` record, and
//! launches the orchestrator as an independent task. The caller gets the
//! record back immediately and observes completion by re-reading the store.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::engine::Orchestrator;
use crate::model::{Connection, ExecutionResult, LastRunStatus, Scene};
use crate::storage::{blocking, ConnectionStore, ResultStore, SceneStore, StoreError};

pub const ADHOC_SCENE_ID: &str = "adhoc";
pub const ADHOC_SCENE_NAME: &str = "Ad-hoc Execution";

/// Parameters for starting an execution.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginRequest {
    #[serde(default)]
    pub scene_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Display name used when no stored scene matches.
    #[serde(default)]
    pub scene_name: Option<String>,
}

/// Handle to a launched execution task. Dropping it detaches the task.
pub struct ExecutionHandle {
    id: String,
    task: JoinHandle<()>,
}

impl ExecutionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the orchestrator task to finish.
    pub async fn wait(self) -> Result<(), JoinError> {
        self.task.await
    }
}

#[derive(Clone)]
pub struct ExecutionService {
    orchestrator: Orchestrator,
    scenes: SceneStore,
    connections: ConnectionStore,
    tracker: TaskTracker,
    pick_first_connection: bool,
}

impl ExecutionService {
    pub fn new(orchestrator: Orchestrator, scenes: SceneStore, connections: ConnectionStore) -> Self {
        Self {
            orchestrator,
            scenes,
            connections,
            tracker: TaskTracker::new(),
            pick_first_connection: true,
        }
    }

    /// Whether a run without a connection id falls back to the first stored
    /// connection.
    pub fn with_pick_first_connection(mut self, enabled: bool) -> Self {
        self.pick_first_connection = enabled;
        self
    }

    pub fn results(&self) -> &ResultStore {
        self.orchestrator.store()
    }

    /// Number of executions still in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Create a `running` record and launch its orchestrator task.
    ///
    /// A missing scene or connection is tolerated: the run proceeds ad hoc
    /// and/or without connection defaults.
    pub async fn begin(
        &self,
        request: BeginRequest,
    ) -> Result<(ExecutionResult, ExecutionHandle), StoreError> {
        let scene = match request.scene_id.clone() {
            Some(id) => {
                let scenes = self.scenes.clone();
                found(blocking(move || scenes.get(&id)).await)?
            }
            None => None,
        };
        let connections = self.connections.clone();
        let connection = match request.connection_id.clone() {
            Some(id) => found(blocking(move || connections.get(&id)).await)?,
            None if self.pick_first_connection => blocking(move || connections.first()).await?,
            None => None,
        };

        let scene_name = scene
            .as_ref()
            .map(|s| s.title.clone())
            .or(request.scene_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| ADHOC_SCENE_NAME.to_string());
        let scene_id = request
            .scene_id
            .unwrap_or_else(|| ADHOC_SCENE_ID.to_string());

        let record = ExecutionResult::new(scene_id, scene_name);
        self.results().set(record.clone()).await?;

        if let Some(scene) = &scene {
            mark_scene(
                &self.scenes,
                &scene.id,
                LastRunStatus::Running,
                Some(record.started_at),
            )
            .await;
        }

        info!(
            execution_id = %record.id,
            scene_id = %record.scene_id,
            connection_id = connection.as_ref().map(|c| c.id.as_str()).unwrap_or("none"),
            "execution requested"
        );

        let task = self.tracker.spawn(Self::drive(
            self.orchestrator.clone(),
            self.scenes.clone(),
            record.id.clone(),
            scene,
            connection,
        ));

        let handle = ExecutionHandle {
            id: record.id.clone(),
            task,
        };
        Ok((record, handle))
    }

    async fn drive(
        orchestrator: Orchestrator,
        scenes: SceneStore,
        execution_id: String,
        scene: Option<Scene>,
        connection: Option<Connection>,
    ) {
        orchestrator
            .run(&execution_id, scene.as_ref(), connection.as_ref())
            .await;

        let Some(scene) = scene else { return };
        let Some(done) = orchestrator.store().get(&execution_id).await else {
            return;
        };
        mark_scene(&scenes, &scene.id, done.status.into(), None).await;
    }

    /// Stop accepting new work, wait for in-flight executions, then close
    /// the result store.
    pub async fn shutdown(&self) {
        self.tracker.close();
        info!(in_flight = self.tracker.len(), "waiting for executions to finish");
        self.tracker.wait().await;
        self.results().close();
    }
}

/// Run one scene to completion and return its final record.
pub async fn run_scene(
    orchestrator: &Orchestrator,
    scene: &Scene,
    connection: Option<&Connection>,
) -> Result<ExecutionResult, StoreError> {
    let record = ExecutionResult::new(scene.id.clone(), scene.title.clone());
    let id = record.id.clone();
    orchestrator.store().set(record).await?;

    orchestrator.run(&id, Some(scene), connection).await;

    let done = orchestrator.store().get(&id).await;
    done.ok_or(StoreError::NotFound {
        kind: "execution",
        id,
    })
}

/// Record a scene's last-run status. Failures are logged, never fatal to the run.
async fn mark_scene(
    scenes: &SceneStore,
    scene_id: &str,
    status: LastRunStatus,
    at: Option<DateTime<Utc>>,
) {
    let (store, id) = (scenes.clone(), scene_id.to_string());
    if let Err(e) = blocking(move || store.mark_run(&id, status, at)).await {
        warn!(scene_id, ?status, error = %e, "failed to record scene run status");
    }
}

/// `NotFound` becomes `None`; other store errors propagate.
fn found<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
