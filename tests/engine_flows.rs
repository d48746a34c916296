//! End-to-end execution flows against a local HTTP target.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use rigourqa::engine::{Orchestrator, StepRunner};
use rigourqa::model::{
    Connection, ExecutionStatus, ExplorationOutcome, LastRunStatus, Scene, Verdict,
};
use rigourqa::service::{run_scene, BeginRequest, ExecutionService, ADHOC_SCENE_NAME};
use rigourqa::storage::{
    open_pool, ConnectionDraft, ConnectionStore, ResultStore, SceneDraft, SceneStore, StoreError,
};

async fn echo(headers: HeaderMap, body: Bytes) -> Json<Value> {
    let headers: BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    Json(json!({
        "headers": headers,
        "bodyLength": body.len(),
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Spawn the target API on an ephemeral port and return its base URL.
async fn spawn_target() -> String {
    let app = Router::new()
        .route(
            "/users",
            get(|| async {
                Json(json!([
                    { "id": 1, "name": "Leanne Graham" },
                    { "id": 2, "name": "Ervin Howell" }
                ]))
            }),
        )
        .route(
            "/users/1",
            get(|| async {
                Json(json!({
                    "id": 1,
                    "name": "Leanne Graham",
                    "address": { "city": "Gwenborough", "zip": "92998-3874" }
                }))
            }),
        )
        .route(
            "/boom",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, Json(json!({ "error": "nope" }))) }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(1000)).await;
                "late"
            }),
        )
        .route("/text", get(|| async { "plain text body" }))
        .route("/echo", get(echo).post(echo).put(echo));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn orchestrator() -> Orchestrator {
    Orchestrator::new(ResultStore::in_memory(), StepRunner::new().unwrap())
}

fn scene(value: Value) -> Scene {
    serde_json::from_value(value).unwrap()
}

fn connection(base_url: &str, extra: Value) -> Connection {
    let mut value = json!({ "id": "conn_1", "name": "Local", "baseUrl": base_url });
    if let (Some(obj), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(value).unwrap()
}

fn body_of(record: &rigourqa::model::ExecutionResult, step: usize) -> &Value {
    &record.step_results[step].response.as_ref().unwrap().body
}

#[tokio::test]
async fn test_users_scene_passes() {
    let base = spawn_target().await;
    let scene = scene(json!({
        "id": "scene_users",
        "title": "Get All Users",
        "steps": [{ "id": "step_1", "description": "GET /users", "method": "GET", "url": "/users" }],
        "assertions": [
            { "id": "a1", "type": "response_code", "expected": 200 },
            { "id": "a2", "type": "body_contains", "expected": "Leanne Graham" },
            { "id": "a3", "type": "header_exists", "expected": "Content-Type" }
        ]
    }));

    let record = run_scene(&orchestrator(), &scene, Some(&connection(&base, json!({}))))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Pass);
    assert_eq!(record.step_results.len(), 1);
    assert_eq!(record.assertion_results.len(), 3);
    assert!(record.assertion_results.iter().all(|a| a.status == Verdict::Pass));
    assert!(record.step_results[0].response_size.unwrap() > 0);
    assert!(record.completed_at.is_some());
    assert!(record.duration.is_some());
    let reasoning = record.reasoning.unwrap();
    assert!(reasoning.starts_with("Execution PASSED: 1/1 steps executed successfully, 3/3 assertions passed."));
}

#[tokio::test]
async fn test_json_path_walks_nested_objects() {
    let base = spawn_target().await;
    let scene = scene(json!({
        "id": "scene_user",
        "title": "One user",
        "steps": [{ "id": "s1", "url": "/users/1" }],
        "assertions": [
            { "id": "a1", "type": "json_path", "target": "address.city", "expected": "Gwenborough" },
            { "id": "a2", "type": "json_path", "target": "address.street", "expected": "Kulas Light" }
        ]
    }));

    let record = run_scene(&orchestrator(), &scene, Some(&connection(&base, json!({}))))
        .await
        .unwrap();

    assert_eq!(record.assertion_results[0].status, Verdict::Pass);
    assert_eq!(record.assertion_results[1].status, Verdict::Fail);
    assert!(record.assertion_results[1].reasoning.contains("undefined"));
    assert_eq!(record.status, ExecutionStatus::Fail);
}

#[tokio::test]
async fn test_server_error_fails_step_and_run() {
    let base = spawn_target().await;
    let scene = scene(json!({
        "id": "scene_boom",
        "title": "Boom",
        "steps": [{ "id": "s1", "url": "/boom" }]
    }));

    let record = run_scene(&orchestrator(), &scene, Some(&connection(&base, json!({}))))
        .await
        .unwrap();

    let step = &record.step_results[0];
    assert_eq!(step.status, Verdict::Fail);
    assert_eq!(step.error.as_deref(), Some("Server error: HTTP 500"));
    assert_eq!(step.response.as_ref().unwrap().status_code, 500);
    assert_eq!(record.status, ExecutionStatus::Fail);
    assert!(record
        .reasoning
        .unwrap()
        .starts_with("Execution FAILED: 0 passed, 1 failed steps."));
}

#[tokio::test]
async fn test_client_error_status_is_not_a_step_failure() {
    let base = spawn_target().await;
    let scene = scene(json!({
        "id": "scene_404",
        "title": "Missing",
        "steps": [{ "id": "s1", "url": "/missing" }],
        "assertions": [{ "id": "a1", "type": "response_code", "expected": 404 }]
    }));

    let record = run_scene(&orchestrator(), &scene, Some(&connection(&base, json!({}))))
        .await
        .unwrap();

    assert_eq!(record.step_results[0].status, Verdict::Pass);
    assert_eq!(record.status, ExecutionStatus::Pass);
}

#[tokio::test]
async fn test_assertions_see_only_last_response() {
    let base = spawn_target().await;
    let scene = scene(json!({
        "id": "scene_two",
        "title": "Two steps",
        "steps": [
            { "id": "s1", "url": "/boom" },
            { "id": "s2", "url": "/users" }
        ],
        "assertions": [{ "id": "a1", "type": "response_code", "expected": 200 }]
    }));

    let record = run_scene(&orchestrator(), &scene, Some(&connection(&base, json!({}))))
        .await
        .unwrap();

    // The failed first step does not stop the second.
    assert_eq!(record.step_results.len(), 2);
    assert_eq!(record.step_results[1].status, Verdict::Pass);
    assert_eq!(record.assertion_results[0].status, Verdict::Pass);
    assert_eq!(record.status, ExecutionStatus::Fail);
}

#[tokio::test]
async fn test_refused_connection_is_a_step_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let scene = scene(json!({
        "id": "scene_refused",
        "title": "Refused",
        "steps": [{ "id": "s1", "url": "/users" }],
        "assertions": [{ "id": "a1", "type": "response_code", "expected": 200 }]
    }));
    let conn = connection(&format!("http://{}", addr), json!({}));

    let record = run_scene(&orchestrator(), &scene, Some(&conn)).await.unwrap();

    let step = &record.step_results[0];
    assert_eq!(step.status, Verdict::Fail);
    assert!(step.response.is_none());
    assert!(step.error.as_deref().unwrap().starts_with("transport error"));
    assert_eq!(record.assertion_results[0].reasoning, "No response available to evaluate");
    assert_eq!(record.status, ExecutionStatus::Fail);
}

#[tokio::test]
async fn test_connection_timeout_bounds_request() {
    let base = spawn_target().await;
    let scene = scene(json!({
        "id": "scene_slow",
        "title": "Slow",
        "steps": [{ "id": "s1", "url": "/slow" }]
    }));
    let conn = connection(&base, json!({ "timeout": 200 }));

    let record = run_scene(&orchestrator(), &scene, Some(&conn)).await.unwrap();

    let step = &record.step_results[0];
    assert_eq!(step.status, Verdict::Fail);
    assert_eq!(step.error.as_deref(), Some("request timed out after 200ms"));
    assert!(step.duration < 1000);
    assert_eq!(record.status, ExecutionStatus::Fail);
}

#[tokio::test]
async fn test_delay_is_charged_to_step_duration() {
    let base = spawn_target().await;
    let scene = scene(json!({
        "id": "scene_delay",
        "title": "Think time",
        "steps": [{ "id": "s1", "url": "/users", "delay": 150 }]
    }));

    let record = run_scene(&orchestrator(), &scene, Some(&connection(&base, json!({}))))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Pass);
    assert!(record.step_results[0].duration >= 150);
}

#[tokio::test]
async fn test_absolute_step_url_ignores_base() {
    let base = spawn_target().await;
    let scene = scene(json!({
        "id": "scene_abs",
        "title": "Absolute",
        "steps": [{ "id": "s1", "url": format!("{}/users", base) }]
    }));
    let conn = connection("http://unused.invalid", json!({}));

    let record = run_scene(&orchestrator(), &scene, Some(&conn)).await.unwrap();

    assert_eq!(record.step_results[0].request.as_ref().unwrap().url, format!("{}/users", base));
    assert_eq!(record.status, ExecutionStatus::Pass);
}

#[tokio::test]
async fn test_post_body_sent_and_get_body_dropped() {
    let base = spawn_target().await;
    let scene = scene(json!({
        "id": "scene_echo",
        "title": "Echo",
        "steps": [
            { "id": "post", "method": "post", "url": "/echo", "body": { "name": "Ada" } },
            { "id": "get", "method": "GET", "url": "/echo", "body": { "ignored": true } }
        ]
    }));

    let record = run_scene(&orchestrator(), &scene, Some(&connection(&base, json!({}))))
        .await
        .unwrap();

    let posted = body_of(&record, 0);
    assert_eq!(posted["body"], json!("{\"name\":\"Ada\"}"));
    assert_eq!(record.step_results[0].request.as_ref().unwrap().method, "POST");

    let fetched = body_of(&record, 1);
    assert_eq!(fetched["bodyLength"], json!(0));
}

#[tokio::test]
async fn test_headers_layer_connection_auth_and_step() {
    let base = spawn_target().await;
    let scene = scene(json!({
        "id": "scene_headers",
        "title": "Headers",
        "steps": [{
            "id": "s1",
            "url": "/echo",
            "headers": { "X-Trace": "step", "X-Team": "qa-step" }
        }]
    }));
    let conn = connection(
        &base,
        json!({
            "authType": "bearer",
            "authToken": "secret-token",
            "headers": { "X-Team": "qa", "X-Env": "dev" }
        }),
    );

    let record = run_scene(&orchestrator(), &scene, Some(&conn)).await.unwrap();

    let seen = &body_of(&record, 0)["headers"];
    assert_eq!(seen["authorization"], json!("Bearer secret-token"));
    assert_eq!(seen["x-env"], json!("dev"));
    assert_eq!(seen["x-team"], json!("qa-step"));
    assert_eq!(seen["x-trace"], json!("step"));
    assert_eq!(seen["content-type"], json!("application/json"));
    assert!(seen["user-agent"].as_str().unwrap().starts_with("RigourQA/"));
}

#[tokio::test]
async fn test_plain_text_body_is_kept_as_string() {
    let base = spawn_target().await;
    let scene = scene(json!({
        "id": "scene_text",
        "title": "Text",
        "steps": [{ "id": "s1", "url": "/text" }],
        "assertions": [{ "id": "a1", "type": "body_contains", "expected": "text body" }]
    }));

    let record = run_scene(&orchestrator(), &scene, Some(&connection(&base, json!({}))))
        .await
        .unwrap();

    assert_eq!(body_of(&record, 0), &json!("plain text body"));
    assert_eq!(record.status, ExecutionStatus::Pass);
}

#[tokio::test]
async fn test_edge_cases_recorded_only_with_connection() {
    let base = spawn_target().await;
    let scene = scene(json!({
        "id": "scene_edges",
        "title": "Edges",
        "edgeCases": [{ "type": "boundary", "description": "Huge page size", "probability": "high" }]
    }));

    let with_conn = run_scene(&orchestrator(), &scene, Some(&connection(&base, json!({}))))
        .await
        .unwrap();
    assert_eq!(with_conn.edge_cases_explored.len(), 1);
    assert_eq!(with_conn.edge_cases_explored[0].result, ExplorationOutcome::Inconclusive);
    assert!(with_conn.self_healing_actions.is_empty());

    let without = run_scene(&orchestrator(), &scene, None).await.unwrap();
    assert!(without.edge_cases_explored.is_empty());
    assert_eq!(without.status, ExecutionStatus::Pass);
}

// ---------------------------------------------------------------------------
// Execution service
// ---------------------------------------------------------------------------

struct Fixture {
    _dir: tempfile::TempDir,
    scenes: SceneStore,
    connections: ConnectionStore,
    service: ExecutionService,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rigourqa.db");
    let pool = open_pool(path.to_str().unwrap()).unwrap();
    let scenes = SceneStore::new(pool.clone());
    let connections = ConnectionStore::new(pool.clone());
    let results = ResultStore::open(Some(pool)).unwrap();
    let orchestrator = Orchestrator::new(results, StepRunner::new().unwrap());
    let service = ExecutionService::new(orchestrator, scenes.clone(), connections.clone());
    Fixture {
        _dir: dir,
        scenes,
        connections,
        service,
    }
}

fn users_draft() -> SceneDraft {
    serde_json::from_value(json!({
        "title": "Users",
        "steps": [{ "id": "s1", "url": "/users" }],
        "assertions": [{ "id": "a1", "type": "response_code", "expected": 200 }]
    }))
    .unwrap()
}

#[tokio::test]
async fn test_begin_returns_running_then_completes() {
    let base = spawn_target().await;
    let fx = fixture();
    fx.connections
        .create(ConnectionDraft {
            name: Some("Local".to_string()),
            base_url: Some(format!("{}/", base)),
            ..Default::default()
        })
        .unwrap();
    let scene = fx.scenes.create(users_draft()).unwrap();

    let (record, handle) = fx
        .service
        .begin(BeginRequest {
            scene_id: Some(scene.id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Running);
    assert_eq!(record.scene_name, "Users");
    assert_eq!(handle.id(), record.id);

    handle.wait().await.unwrap();

    let done = fx.service.results().get(&record.id).await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Pass);
    assert_eq!(done.step_results.len(), 1);

    let scene = fx.scenes.get(&scene.id).unwrap();
    assert_eq!(scene.last_run_status, Some(LastRunStatus::Pass));
    assert_eq!(scene.last_run_at, Some(record.started_at));
}

#[tokio::test]
async fn test_record_is_observable_mid_run() {
    let base = spawn_target().await;
    let fx = fixture();
    fx.connections
        .create(ConnectionDraft {
            name: Some("Local".to_string()),
            base_url: Some(base),
            ..Default::default()
        })
        .unwrap();
    let draft: SceneDraft = serde_json::from_value(json!({
        "title": "Users then slow",
        "steps": [
            { "id": "s1", "url": "/users" },
            { "id": "s2", "url": "/slow" }
        ]
    }))
    .unwrap();
    let scene = fx.scenes.create(draft).unwrap();

    let (record, handle) = fx
        .service
        .begin(BeginRequest {
            scene_id: Some(scene.id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();

    // The second step holds the run open for a second; the first result is
    // published as soon as it lands.
    let mut midway = None;
    for _ in 0..300 {
        let snapshot = fx.service.results().get(&record.id).await.unwrap();
        if !snapshot.step_results.is_empty() {
            midway = Some(snapshot);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let midway = midway.expect("first step result was never published");
    assert_eq!(midway.status, ExecutionStatus::Running);
    assert_eq!(midway.step_results.len(), 1);
    assert_eq!(midway.step_results[0].step_id, "s1");
    assert!(midway.completed_at.is_none());

    handle.wait().await.unwrap();

    let done = fx.service.results().get(&record.id).await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Pass);
    assert_eq!(done.step_results.len(), 2);
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn test_begin_without_scene_runs_ad_hoc() {
    let fx = fixture();

    let (record, handle) = fx
        .service
        .begin(BeginRequest {
            scene_id: Some("missing".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(record.scene_id, "missing");
    assert_eq!(record.scene_name, ADHOC_SCENE_NAME);

    handle.wait().await.unwrap();
    let done = fx.service.results().get(&record.id).await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Pass);
    assert!(done.step_results.is_empty());
}

#[tokio::test]
async fn test_shutdown_drains_and_closes_store() {
    let base = spawn_target().await;
    let fx = fixture();
    fx.connections
        .create(ConnectionDraft {
            name: Some("Local".to_string()),
            base_url: Some(base),
            ..Default::default()
        })
        .unwrap();
    let scene = fx.scenes.create(users_draft()).unwrap();

    let (record, _handle) = fx
        .service
        .begin(BeginRequest {
            scene_id: Some(scene.id),
            ..Default::default()
        })
        .await
        .unwrap();

    fx.service.shutdown().await;

    assert_eq!(fx.service.in_flight(), 0);
    assert!(fx.service.results().is_closed());
    let done = fx.service.results().get(&record.id).await.unwrap();
    assert!(done.status.is_terminal());

    let err = fx
        .service
        .begin(BeginRequest::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::Closed));
}
