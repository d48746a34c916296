//! API route definitions.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use super::state::AppState;
use crate::dashboard::StatsAggregator;
use crate::probes::DEFAULT_CHECK_TIMEOUT_MS;
use crate::service::BeginRequest;
use crate::storage::{blocking, ConnectionDraft, SceneDraft, StoreError};

type ApiResult<T = Json<Value>> = Result<T, ApiError>;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/scenes", get(list_scenes).post(create_scene))
        .route(
            "/scenes/{id}",
            get(get_scene).patch(update_scene).delete(delete_scene),
        )
        .route("/connections", get(list_connections).post(create_connection))
        .route("/connections/test", post(test_connection))
        .route(
            "/connections/{id}",
            get(get_connection)
                .patch(update_connection)
                .delete(delete_connection),
        )
        .route("/executions", get(list_executions).post(begin_execution))
        .route("/executions/{id}", get(get_execution))
        .route("/dashboard/stats", get(dashboard_stats))
}

fn envelope(data: impl Serialize, meta: Value) -> Json<Value> {
    Json(json!({ "data": data, "meta": meta }))
}

fn single(data: impl Serialize) -> Json<Value> {
    envelope(data, json!({ "timestamp": chrono::Utc::now().to_rfc3339() }))
}

fn listing<T: Serialize>(items: Vec<T>) -> Json<Value> {
    let total = items.len();
    envelope(items, json!({ "total": total }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

// ---------------------------------------------------------------------------
// Scenes
// ---------------------------------------------------------------------------

async fn list_scenes(State(state): State<AppState>) -> ApiResult {
    let scenes = blocking(move || state.scenes.list()).await?;
    Ok(listing(scenes))
}

async fn create_scene(
    State(state): State<AppState>,
    payload: Result<Json<SceneDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(draft) = payload?;
    let scene = blocking(move || state.scenes.create(draft)).await?;
    tracing::info!(scene_id = %scene.id, title = %scene.title, "scene created");
    Ok((StatusCode::CREATED, single(scene)))
}

async fn get_scene(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let scene = blocking(move || state.scenes.get(&id)).await?;
    Ok(single(scene))
}

async fn update_scene(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let Json(patch) = payload?;
    let scene = blocking(move || state.scenes.update(&id, patch)).await?;
    Ok(single(scene))
}

async fn delete_scene(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let deleted = id.clone();
    blocking(move || state.scenes.delete(&id)).await?;
    Ok(single(json!({ "id": deleted, "deleted": true })))
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

async fn list_connections(State(state): State<AppState>) -> ApiResult {
    let connections = blocking(move || state.connections.list()).await?;
    Ok(listing(connections))
}

async fn create_connection(
    State(state): State<AppState>,
    payload: Result<Json<ConnectionDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(draft) = payload?;
    let connection = blocking(move || state.connections.create(draft)).await?;
    tracing::info!(connection_id = %connection.id, base_url = %connection.base_url, "connection created");
    Ok((StatusCode::CREATED, single(connection)))
}

async fn get_connection(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let connection = blocking(move || state.connections.get(&id)).await?;
    Ok(single(connection))
}

async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    let Json(patch) = payload?;
    let connection = blocking(move || state.connections.update(&id, patch)).await?;
    Ok(single(connection))
}

async fn delete_connection(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let deleted = id.clone();
    blocking(move || state.connections.delete(&id)).await?;
    Ok(single(json!({ "id": deleted, "deleted": true })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionTestRequest {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// Milliseconds.
    #[serde(default)]
    timeout: Option<u64>,
}

async fn test_connection(
    State(state): State<AppState>,
    payload: Result<Json<ConnectionTestRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload?;
    let base_url = req
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Base URL is required".to_string()))?;
    let timeout = Duration::from_millis(
        req.timeout
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_CHECK_TIMEOUT_MS),
    );

    let check = state.probe.check(base_url, &req.headers, timeout).await;
    Ok(single(check))
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionQuery {
    scene_id: Option<String>,
}

async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionQuery>,
) -> ApiResult {
    let executions = state
        .executions
        .results()
        .list(query.scene_id.as_deref())
        .await;
    Ok(listing(executions))
}

async fn begin_execution(
    State(state): State<AppState>,
    payload: Result<Json<BeginRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(request) = payload?;
    let (record, _handle) = state.executions.begin(request).await?;
    Ok((StatusCode::CREATED, single(record)))
}

async fn get_execution(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    match state.executions.results().get(&id).await {
        Some(record) => Ok(single(record)),
        None => Err(StoreError::NotFound {
            kind: "execution",
            id,
        }
        .into()),
    }
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

async fn dashboard_stats(State(state): State<AppState>) -> ApiResult {
    let scenes = state.scenes.clone();
    let total_scenes = blocking(move || scenes.count()).await?;
    let executions = state.executions.results().list(None).await;
    Ok(single(StatsAggregator::compute(total_scenes, &executions)))
}
