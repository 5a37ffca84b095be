use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use runway_types::AgentSpecification;

use super::{SpecStore, StoreError, parse_timestamp, stamp};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSpec {
    pub spec: AgentSpecification,
    pub version: u32,
    pub content_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Unchanged { version: u32 },
    Saved { version: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecVersion {
    pub version: u32,
    pub content_hash: String,
    pub stored_at: DateTime<Utc>,
}

type SpecRow = (String, u32, String, bool, String, String);

const SPEC_COLUMNS: &str = "document, version, content_hash, active, created_at, updated_at";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SpecRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get::<_, i32>(3)? != 0,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode((document, version, content_hash, active, created, updated): SpecRow) -> Result<StoredSpec, StoreError> {
    Ok(StoredSpec {
        spec: serde_json::from_str(&document)?,
        version,
        content_hash,
        active,
        created_at: parse_timestamp(&created)?,
        updated_at: parse_timestamp(&updated)?,
    })
}

impl SpecStore {
    /// Stores a new specification as version 1. Ids are never reused, even after deletion.
    pub async fn insert_spec(&self, spec: &AgentSpecification) -> Result<StoredSpec, StoreError> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM specifications WHERE id = ?1",
                params![spec.id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::Conflict(spec.id.clone()));
        }
        let document = serde_json::to_string(spec)?;
        let hash = spec.content_hash();
        let now = Utc::now();
        let stamped = stamp(now);
        tx.execute(
            "INSERT INTO specifications (id, name, owner, version, content_hash, document, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, 1, ?6, ?6)",
            params![spec.id, spec.name, spec.owner, hash, document, stamped],
        )?;
        tx.execute(
            "INSERT INTO specification_versions (spec_id, version, content_hash, document, stored_at)
             VALUES (?1, 1, ?2, ?3, ?4)",
            params![spec.id, hash, document, stamped],
        )?;
        tx.commit()?;
        Ok(StoredSpec {
            spec: spec.clone(),
            version: 1,
            content_hash: hash,
            active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replaces the active document for `spec.id`. Identical content is not re-stored.
    pub async fn replace_spec(&self, spec: &AgentSpecification) -> Result<SaveOutcome, StoreError> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let current: Option<(u32, String)> = tx
            .query_row(
                "SELECT version, content_hash FROM specifications WHERE id = ?1 AND active = 1",
                params![spec.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((version, current_hash)) = current else {
            return Err(StoreError::NotFound(spec.id.clone()));
        };
        let hash = spec.content_hash();
        if hash == current_hash {
            return Ok(SaveOutcome::Unchanged { version });
        }
        let next = version + 1;
        let document = serde_json::to_string(spec)?;
        let stamped = stamp(Utc::now());
        tx.execute(
            "UPDATE specifications SET name = ?2, owner = ?3, version = ?4, content_hash = ?5, document = ?6, updated_at = ?7
             WHERE id = ?1",
            params![spec.id, spec.name, spec.owner, next, hash, document, stamped],
        )?;
        tx.execute(
            "INSERT INTO specification_versions (spec_id, version, content_hash, document, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![spec.id, next, hash, document, stamped],
        )?;
        tx.commit()?;
        Ok(SaveOutcome::Saved { version: next })
    }

    pub async fn get_spec(&self, id: &str) -> Result<Option<StoredSpec>, StoreError> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                &format!("SELECT {SPEC_COLUMNS} FROM specifications WHERE id = ?1"),
                params![id],
                read_row,
            )
            .optional()?;
        row.map(decode).transpose()
    }

    pub async fn list_specs(&self, include_inactive: bool) -> Result<Vec<StoredSpec>, StoreError> {
        let db = self.db.lock().await;
        let sql = if include_inactive {
            format!("SELECT {SPEC_COLUMNS} FROM specifications ORDER BY id ASC")
        } else {
            format!("SELECT {SPEC_COLUMNS} FROM specifications WHERE active = 1 ORDER BY id ASC")
        };
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], read_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(decode(row?)?);
        }
        Ok(out)
    }

    /// Soft delete. Returns false when the specification was missing or already inactive.
    pub async fn deactivate_spec(&self, id: &str) -> Result<bool, StoreError> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE specifications SET active = 0, updated_at = ?2 WHERE id = ?1 AND active = 1",
            params![id, stamp(Utc::now())],
        )?;
        Ok(rows > 0)
    }

    pub async fn spec_versions(&self, id: &str) -> Result<Vec<SpecVersion>, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT version, content_hash, stored_at FROM specification_versions
             WHERE spec_id = ?1 ORDER BY version ASC",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (version, content_hash, stored_at) = row?;
            out.push(SpecVersion {
                version,
                content_hash,
                stored_at: parse_timestamp(&stored_at)?,
            });
        }
        Ok(out)
    }

    pub async fn spec_version_document(
        &self,
        id: &str,
        version: u32,
    ) -> Result<Option<AgentSpecification>, StoreError> {
        let db = self.db.lock().await;
        let document: Option<String> = db
            .query_row(
                "SELECT document FROM specification_versions WHERE spec_id = ?1 AND version = ?2",
                params![id, version],
                |row| row.get(0),
            )
            .optional()?;
        Ok(document.map(|d| serde_json::from_str(&d)).transpose()?)
    }
}
