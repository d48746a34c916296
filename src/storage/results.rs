//! Live execution records.
//!
//! Records are held in memory behind a `tokio::sync::RwLock`. Readers always
//! get a cloned snapshot, so a record observed mid-run is never torn. Each
//! record has a single writer: the orchestrator task that owns it. Terminal
//! records are also archived to SQLite when a pool is attached, and reloaded
//! on the next `open`. The in-memory record is authoritative: an archive
//! write that fails is logged and does not fail the mutation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::SecondsFormat;
use rusqlite::params;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{Pool, StoreError};
use crate::model::ExecutionResult;

struct Inner {
    records: RwLock<HashMap<String, ExecutionResult>>,
    archive: Option<Pool>,
    closed: AtomicBool,
}

/// Handle to the execution result store. Cheap to clone.
#[derive(Clone)]
pub struct ResultStore {
    inner: Arc<Inner>,
}

impl ResultStore {
    /// Open the store, reloading archived executions when `archive` is given.
    pub fn open(archive: Option<Pool>) -> Result<Self, StoreError> {
        let mut records = HashMap::new();
        if let Some(pool) = &archive {
            let conn = pool.get()?;
            let mut stmt = conn.prepare("SELECT id, body_json FROM executions")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for r in rows {
                let (id, json) = r?;
                match serde_json::from_str::<ExecutionResult>(&json) {
                    Ok(record) => {
                        records.insert(id, record);
                    }
                    Err(e) => warn!(execution_id = %id, error = %e, "skipping unreadable archived execution"),
                }
            }
            debug!(count = records.len(), "reloaded archived executions");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                records: RwLock::new(records),
                archive,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// A store with no archive.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                records: RwLock::new(HashMap::new()),
                archive: None,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Stop accepting writes. Reads keep working.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Insert or replace a record.
    pub async fn set(&self, record: ExecutionResult) -> Result<(), StoreError> {
        self.ensure_open()?;
        let terminal = record.status.is_terminal().then(|| record.clone());
        self.inner
            .records
            .write()
            .await
            .insert(record.id.clone(), record);

        if let Some(snapshot) = terminal {
            self.archive(snapshot).await;
        }
        Ok(())
    }

    /// Snapshot of a record.
    pub async fn get(&self, id: &str) -> Option<ExecutionResult> {
        self.inner.records.read().await.get(id).cloned()
    }

    /// Mutate a record in place. Archives it if the mutation left it terminal.
    pub async fn update<F, R>(&self, id: &str, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut ExecutionResult) -> R,
    {
        self.ensure_open()?;
        let (out, terminal) = {
            let mut records = self.inner.records.write().await;
            let record = records.get_mut(id).ok_or_else(|| StoreError::NotFound {
                kind: "execution",
                id: id.to_string(),
            })?;
            let out = f(record);
            (out, record.status.is_terminal().then(|| record.clone()))
        };

        if let Some(snapshot) = terminal {
            self.archive(snapshot).await;
        }
        Ok(out)
    }

    /// All records, newest first, optionally filtered by scene.
    pub async fn list(&self, scene_id: Option<&str>) -> Vec<ExecutionResult> {
        let records = self.inner.records.read().await;
        let mut list: Vec<ExecutionResult> = records
            .values()
            .filter(|r| scene_id.map_or(true, |s| r.scene_id == s))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        list
    }

    async fn archive(&self, record: ExecutionResult) {
        let Some(pool) = self.inner.archive.clone() else {
            return;
        };
        let id = record.id.clone();
        if let Err(e) = super::blocking(move || write_archive(&pool, &record)).await {
            warn!(execution_id = %id, error = %e, "failed to archive execution");
        }
    }
}

fn write_archive(pool: &Pool, record: &ExecutionResult) -> Result<(), StoreError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO executions (id, scene_id, status, body_json, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET status = excluded.status,
                                       body_json = excluded.body_json",
        params![
            record.id,
            record.scene_id,
            record.status.to_string(),
            serde_json::to_string(record)?,
            record.started_at.to_rfc3339_opts(SecondsFormat::Micros, true)
        ],
    )?;
    Ok(())
}
