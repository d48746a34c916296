//! Scene and connection records, stored as JSON bodies keyed by id.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Pool, StoreError};
use crate::engine::DEFAULT_TIMEOUT_MS;
use crate::model::scene::default_actor;
use crate::model::{
    Assertion, AuthType, Connection, EdgeCaseHint, Environment, LastRunStatus, Scene, Step,
};

/// A record kept in one of the JSON-body tables.
pub(crate) trait Record: Serialize + DeserializeOwned {
    const TABLE: &'static str;
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;
}

impl Record for Scene {
    const TABLE: &'static str = "scenes";
    const KIND: &'static str = "scene";

    fn id(&self) -> &str {
        &self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Record for Connection {
    const TABLE: &'static str = "connections";
    const KIND: &'static str = "connection";

    fn id(&self) -> &str {
        &self.id
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Fixed-width UTC timestamps so SQL text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

struct RecordTable<T> {
    pool: Pool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordTable<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> RecordTable<T> {
    fn new(pool: Pool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }

    /// Most recently updated first.
    fn list(&self) -> Result<Vec<T>, StoreError> {
        self.query(&format!(
            "SELECT body_json FROM {} ORDER BY updated_at DESC, rowid DESC",
            T::TABLE
        ))
    }

    fn oldest(&self) -> Result<Option<T>, StoreError> {
        Ok(self
            .query(&format!(
                "SELECT body_json FROM {} ORDER BY created_at ASC, rowid ASC LIMIT 1",
                T::TABLE
            ))?
            .into_iter()
            .next())
    }

    fn query(&self, sql: &str) -> Result<Vec<T>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for r in rows {
            records.push(serde_json::from_str(&r?)?);
        }
        Ok(records)
    }

    fn get(&self, id: &str) -> Result<T, StoreError> {
        let conn = self.pool.get()?;
        read(&conn, id)
    }

    fn put(&self, record: &T) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        write(&conn, record)
    }

    /// Read-modify-write of one record under an immediate transaction, so
    /// concurrent writers to the same row serialize instead of losing updates.
    fn modify<F>(&self, id: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(T) -> Result<T, StoreError>,
    {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let updated = f(read(&tx, id)?)?;
        write(&tx, &updated)?;
        tx.commit()?;
        Ok(updated)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", T::TABLE),
            params![id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.pool.get()?;
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", T::TABLE), [], |row| {
            row.get(0)
        })?;
        Ok(n as usize)
    }

    /// Shallow merge of `patch` into `id`. `id` and `createdAt` never change;
    /// `updatedAt` is refreshed.
    fn patch(&self, id: &str, patch: Value) -> Result<T, StoreError> {
        self.modify(id, |current| {
            let Value::Object(changes) = patch else {
                return Err(StoreError::Invalid("patch body must be a JSON object".to_string()));
            };
            let mut merged = match serde_json::to_value(&current)? {
                Value::Object(map) => map,
                _ => return Err(StoreError::Invalid(format!("{} is not an object", T::KIND))),
            };
            for (key, value) in changes {
                if key == "id" || key == "createdAt" {
                    continue;
                }
                merged.insert(key, value);
            }
            merged.insert("updatedAt".to_string(), serde_json::to_value(Utc::now())?);

            serde_json::from_value(Value::Object(merged))
                .map_err(|e| StoreError::Invalid(format!("invalid {} update: {}", T::KIND, e)))
        })
    }
}

fn read<T: Record>(conn: &rusqlite::Connection, id: &str) -> Result<T, StoreError> {
    let body: Option<String> = conn
        .query_row(
            &format!("SELECT body_json FROM {} WHERE id = ?1", T::TABLE),
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    match body {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Err(StoreError::NotFound {
            kind: T::KIND,
            id: id.to_string(),
        }),
    }
}

fn write<T: Record>(conn: &rusqlite::Connection, record: &T) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO {} (id, body_json, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET body_json = excluded.body_json,
                                           updated_at = excluded.updated_at",
            T::TABLE
        ),
        params![
            record.id(),
            serde_json::to_string(record)?,
            timestamp(record.created_at()),
            timestamp(record.updated_at())
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Scenes
// ---------------------------------------------------------------------------

/// Fields accepted when creating a scene.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDraft {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub edge_cases: Vec<EdgeCaseHint>,
}

#[derive(Clone)]
pub struct SceneStore {
    table: RecordTable<Scene>,
}

impl SceneStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            table: RecordTable::new(pool),
        }
    }

    pub fn list(&self) -> Result<Vec<Scene>, StoreError> {
        self.table.list()
    }

    pub fn get(&self, id: &str) -> Result<Scene, StoreError> {
        self.table.get(id)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.table.count()
    }

    pub fn create(&self, draft: SceneDraft) -> Result<Scene, StoreError> {
        let title = draft.title.as_deref().map(str::trim).unwrap_or_default();
        if title.is_empty() {
            return Err(StoreError::Invalid("Title is required".to_string()));
        }

        let now = Utc::now();
        let scene = Scene {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: draft.description.unwrap_or_default(),
            actor: draft.actor.filter(|a| !a.is_empty()).unwrap_or_else(default_actor),
            steps: draft.steps,
            assertions: draft.assertions,
            edge_cases: Some(draft.edge_cases),
            created_at: now,
            updated_at: now,
            last_run_at: None,
            last_run_status: None,
        };
        self.table.put(&scene)?;
        Ok(scene)
    }

    /// Insert a fully formed scene as-is.
    pub fn insert(&self, scene: &Scene) -> Result<(), StoreError> {
        self.table.put(scene)
    }

    pub fn update(&self, id: &str, patch: Value) -> Result<Scene, StoreError> {
        self.table.patch(id, patch)
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.table.delete(id)
    }

    /// Record the latest run on the scene without touching `updatedAt`.
    pub fn mark_run(
        &self,
        id: &str,
        status: LastRunStatus,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.table.modify(id, |mut scene| {
            if let Some(at) = at {
                scene.last_run_at = Some(at);
            }
            scene.last_run_status = Some(status);
            Ok(scene)
        })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// Fields accepted when creating a connection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth_type: Option<AuthType>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub environment: Option<Environment>,
}

#[derive(Clone)]
pub struct ConnectionStore {
    table: RecordTable<Connection>,
}

impl ConnectionStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            table: RecordTable::new(pool),
        }
    }

    pub fn list(&self) -> Result<Vec<Connection>, StoreError> {
        self.table.list()
    }

    pub fn get(&self, id: &str) -> Result<Connection, StoreError> {
        self.table.get(id)
    }

    /// The earliest-created connection, used when a run names none.
    pub fn first(&self) -> Result<Option<Connection>, StoreError> {
        self.table.oldest()
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.table.count()
    }

    pub fn create(&self, draft: ConnectionDraft) -> Result<Connection, StoreError> {
        let name = draft.name.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(StoreError::Invalid("Name is required".to_string()));
        }
        let base_url = draft.base_url.as_deref().map(str::trim).unwrap_or_default();
        if base_url.is_empty() {
            return Err(StoreError::Invalid("Base URL is required".to_string()));
        }

        let now = Utc::now();
        let connection = Connection {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_type: draft.auth_type.unwrap_or_default(),
            auth_token: draft.auth_token,
            headers: draft.headers,
            timeout: Some(draft.timeout.filter(|t| *t > 0).unwrap_or(DEFAULT_TIMEOUT_MS)),
            environment: draft.environment.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        self.table.put(&connection)?;
        Ok(connection)
    }

    pub fn insert(&self, connection: &Connection) -> Result<(), StoreError> {
        self.table.put(connection)
    }

    pub fn update(&self, id: &str, patch: Value) -> Result<Connection, StoreError> {
        self.table.patch(id, patch)
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.table.delete(id)
    }
}
