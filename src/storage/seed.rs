//! Demo records inserted into an empty database.

use chrono::Utc;
use serde_json::json;
use tracing::info;

use super::{ConnectionStore, SceneStore, StoreError};
use crate::model::{
    Assertion, AssertionKind, AuthType, Connection, EdgeCaseHint, Environment, Probability, Scene,
    Step,
};

pub const DEMO_CONNECTION_ID: &str = "seed_conn_1";
pub const DEMO_SCENE_ID: &str = "seed_scene_1";

/// Insert the demo connection and scene if neither store has any records.
/// Returns whether anything was inserted.
pub fn seed_demo(scenes: &SceneStore, connections: &ConnectionStore) -> Result<bool, StoreError> {
    if scenes.count()? > 0 || connections.count()? > 0 {
        return Ok(false);
    }

    let now = Utc::now();
    connections.insert(&Connection {
        id: DEMO_CONNECTION_ID.to_string(),
        name: "JSONPlaceholder (Demo)".to_string(),
        base_url: "https://jsonplaceholder.typicode.com".to_string(),
        auth_type: AuthType::None,
        auth_token: None,
        headers: Default::default(),
        timeout: Some(10_000),
        environment: Environment::Dev,
        created_at: now,
        updated_at: now,
    })?;

    scenes.insert(&Scene {
        id: DEMO_SCENE_ID.to_string(),
        title: "Get All Users".to_string(),
        description: "Fetch the list of users from JSONPlaceholder and verify the response"
            .to_string(),
        actor: "api_client".to_string(),
        steps: vec![Step {
            id: "step_1".to_string(),
            description: "GET /users".to_string(),
            method: Some("GET".to_string()),
            url: Some("/users".to_string()),
            body: None,
            headers: None,
            delay: None,
        }],
        assertions: vec![
            Assertion {
                id: "assert_1".to_string(),
                kind: AssertionKind::ResponseCode,
                target: None,
                expected: Some(json!(200)),
                operator: None,
            },
            Assertion {
                id: "assert_2".to_string(),
                kind: AssertionKind::BodyContains,
                target: Some("response_body".to_string()),
                expected: Some(json!("Leanne Graham")),
                operator: None,
            },
        ],
        edge_cases: Some(vec![EdgeCaseHint {
            kind: "boundary".to_string(),
            description: "Request with invalid query params".to_string(),
            probability: Probability::Medium,
        }]),
        created_at: now,
        updated_at: now,
        last_run_at: None,
        last_run_status: None,
    })?;

    info!("seeded demo connection and scene");
    Ok(true)
}
