use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use runway_core::{AdapterStats, TerminalRecord, adapter_stats, success_rate};
use runway_types::{BackendId, ExecutionAttempt, ExecutionResult};

/// How much of the log stays in memory. Older entries live on in the store only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    /// Newest attempts kept per specification.
    pub attempts: usize,
    /// Terminal records older than this are dropped.
    pub window: Duration,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            attempts: 500,
            window: Duration::hours(24),
        }
    }
}

#[derive(Default)]
struct SpecLog {
    attempts: VecDeque<ExecutionAttempt>,
    terminals: VecDeque<TerminalRecord>,
}

impl SpecLog {
    fn trim(&mut self, retention: Retention, now: DateTime<Utc>) {
        let excess = self.attempts.len().saturating_sub(retention.attempts);
        self.attempts.drain(..excess);
        let horizon = now - retention.window;
        self.terminals.retain(|t| t.finished_at >= horizon);
    }
}

/// Append-only attempt and request log, sharded per specification.
///
/// Appends for different specifications take different locks. Every append happens
/// under one write lock, so readers see whole records only.
#[derive(Default)]
pub struct ExecutionHistory {
    shards: RwLock<HashMap<String, Arc<RwLock<SpecLog>>>>,
    retention: Retention,
}

impl ExecutionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Retention) -> Self {
        Self {
            shards: RwLock::default(),
            retention,
        }
    }

    fn shard(&self, spec_id: &str) -> Arc<RwLock<SpecLog>> {
        if let Some(shard) = self
            .shards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(spec_id)
        {
            return shard.clone();
        }
        self.shards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(spec_id.to_string())
            .or_default()
            .clone()
    }

    fn existing(&self, spec_id: &str) -> Option<Arc<RwLock<SpecLog>>> {
        self.shards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(spec_id)
            .cloned()
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    pub fn append_attempt(&self, attempt: ExecutionAttempt) {
        self.append_attempts(&attempt.spec_id.clone(), [attempt]);
    }

    /// Appends a batch in the order given, under one lock.
    pub fn append_attempts(&self, spec_id: &str, attempts: impl IntoIterator<Item = ExecutionAttempt>) {
        let shard = self.shard(spec_id);
        let mut log = shard.write().unwrap_or_else(PoisonError::into_inner);
        log.attempts.extend(attempts);
        log.trim(self.retention, Utc::now());
    }

    pub fn record_terminal(&self, spec_id: &str, record: TerminalRecord) {
        let shard = self.shard(spec_id);
        let mut log = shard.write().unwrap_or_else(PoisonError::into_inner);
        log.terminals.push_back(record);
        log.trim(self.retention, Utc::now());
    }

    /// Loads persisted results, oldest first, into an empty history.
    pub fn seed(&self, results: &[ExecutionResult]) {
        let now = Utc::now();
        for result in results {
            let shard = self.shard(&result.spec_id);
            let mut log = shard.write().unwrap_or_else(PoisonError::into_inner);
            log.attempts.extend(result.attempts.iter().cloned());
            log.terminals.push_back(TerminalRecord {
                finished_at: result.finished_at,
                cause: result.failure_cause(),
            });
            log.trim(self.retention, now);
        }
    }

    pub fn attempts(&self, spec_id: &str) -> Vec<ExecutionAttempt> {
        self.existing(spec_id)
            .map(|shard| {
                shard
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .attempts
                    .iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The last `limit` attempts, oldest first.
    pub fn recent_attempts(&self, spec_id: &str, limit: usize) -> Vec<ExecutionAttempt> {
        let Some(shard) = self.existing(spec_id) else {
            return Vec::new();
        };
        let log = shard.read().unwrap_or_else(PoisonError::into_inner);
        let skip = log.attempts.len().saturating_sub(limit);
        log.attempts.iter().skip(skip).cloned().collect()
    }

    pub fn attempt_count(&self, spec_id: &str) -> usize {
        self.existing(spec_id)
            .map(|shard| {
                shard
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .attempts
                    .len()
            })
            .unwrap_or(0)
    }

    pub fn terminal_count(&self, spec_id: &str) -> usize {
        self.existing(spec_id)
            .map(|shard| {
                shard
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .terminals
                    .len()
            })
            .unwrap_or(0)
    }

    pub fn success_rate(&self, spec_id: &str, window: Duration, now: DateTime<Utc>) -> Option<f64> {
        let shard = self.existing(spec_id)?;
        let log = shard.read().unwrap_or_else(PoisonError::into_inner);
        success_rate(&log.terminals, window, now)
    }

    pub fn adapter_stats(&self, spec_id: &str) -> BTreeMap<BackendId, AdapterStats> {
        self.existing(spec_id)
            .map(|shard| {
                adapter_stats(&shard.read().unwrap_or_else(PoisonError::into_inner).attempts)
            })
            .unwrap_or_default()
    }
}
