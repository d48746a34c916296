use std::sync::Arc;

use crate::probes::HttpProbe;
use crate::service::ExecutionService;
use crate::storage::{ConnectionStore, SceneStore};

#[derive(Clone)]
pub struct AppState {
    pub scenes: SceneStore,
    pub connections: ConnectionStore,
    pub executions: ExecutionService,
    pub probe: Arc<HttpProbe>,
}
