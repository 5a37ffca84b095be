use chrono::{DateTime, Utc};
use rusqlite::params;
use runway_types::{ExecutionResult, RequestOutcome};

use super::{SpecStore, StoreError, stamp};

impl SpecStore {
    pub async fn record_result(&self, result: &ExecutionResult) -> Result<(), StoreError> {
        let (state, cause, adapter) = match &result.outcome {
            RequestOutcome::Succeeded { adapter, .. } => ("succeeded", None, Some(adapter.as_str())),
            RequestOutcome::Failed { cause } => ("failed", Some(cause.as_str()), None),
        };
        let json = serde_json::to_string(result)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT OR REPLACE INTO execution_results
                (request_id, spec_id, origin, state, cause, adapter, attempt_count, result_json, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                result.request_id.to_string(),
                result.spec_id,
                result.origin.as_str(),
                state,
                cause,
                adapter,
                result.attempts.len() as i64,
                json,
                stamp(result.started_at),
                stamp(result.finished_at),
            ],
        )?;
        Ok(())
    }

    /// Most recent results first.
    pub async fn recent_results(
        &self,
        spec_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionResult>, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT result_json FROM execution_results WHERE spec_id = ?1
             ORDER BY finished_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![spec_id, limit as i64], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    /// Results finished at or after `since`, oldest first.
    pub async fn results_since(&self, since: DateTime<Utc>) -> Result<Vec<ExecutionResult>, StoreError> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT result_json FROM execution_results WHERE finished_at >= ?1 ORDER BY finished_at ASC",
        )?;
        let rows = stmt.query_map(params![stamp(since)], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }
}
