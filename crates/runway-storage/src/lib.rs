//! SQLite persistence for specification documents and execution results.

mod results;
mod specs;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::info;

pub use specs::{SaveOutcome, SpecVersion, StoredSpec};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt stored document: {0}")]
    Document(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("specification '{0}' already exists")]
    Conflict(String),
    #[error("specification '{0}' not found")]
    NotFound(String),
    #[error("invalid stored timestamp '{0}'")]
    Timestamp(String),
}

/// Durable store shared by the agent manager and the HTTP surface.
#[derive(Clone)]
pub struct SpecStore {
    db: Arc<Mutex<Connection>>,
}

impl SpecStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(path)?;
        info!("Opened specification store at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

             CREATE TABLE IF NOT EXISTS specifications (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                owner TEXT NOT NULL,
                version INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                document TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS specification_versions (
                spec_id TEXT NOT NULL REFERENCES specifications(id),
                version INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                document TEXT NOT NULL,
                stored_at TEXT NOT NULL,
                PRIMARY KEY (spec_id, version)
             );

             CREATE TABLE IF NOT EXISTS execution_results (
                request_id TEXT PRIMARY KEY,
                spec_id TEXT NOT NULL REFERENCES specifications(id),
                origin TEXT NOT NULL,
                state TEXT NOT NULL,
                cause TEXT,
                adapter TEXT,
                attempt_count INTEGER NOT NULL,
                result_json TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_execution_results_spec
                ON execution_results (spec_id, finished_at);",
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn stamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp(raw.to_string()))
}

#[cfg(test)]
mod tests;
