use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use runway_types::{AttemptOutcome, BackendId, ExecutionAttempt, FailureCause};

/// Terminal state of one request as seen by statistics.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TerminalRecord {
    pub finished_at: DateTime<Utc>,
    pub cause: Option<FailureCause>,
}

impl TerminalRecord {
    pub fn succeeded(&self) -> bool {
        self.cause.is_none()
    }

    /// Requests withdrawn by an operator say nothing about reliability.
    pub fn counts(&self) -> bool {
        self.cause != Some(FailureCause::Cancelled)
    }
}

/// Successful terminal requests over all counted terminal requests inside the window.
///
/// `None` when the window holds no counted request.
pub fn success_rate<'a>(
    records: impl IntoIterator<Item = &'a TerminalRecord>,
    window: Duration,
    now: DateTime<Utc>,
) -> Option<f64> {
    let cutoff = now - window;
    let (mut total, mut ok) = (0u64, 0u64);
    for record in records {
        if record.finished_at < cutoff || !record.counts() {
            continue;
        }
        total += 1;
        if record.succeeded() {
            ok += 1;
        }
    }
    (total > 0).then(|| ok as f64 / total as f64)
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AdapterStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub cancelled: u64,
}

impl AdapterStats {
    /// Cancelled attempts are excluded from the denominator.
    pub fn success_rate(&self) -> Option<f64> {
        let counted = self.attempts - self.cancelled;
        (counted > 0).then(|| self.successes as f64 / counted as f64)
    }
}

pub fn adapter_stats<'a>(
    attempts: impl IntoIterator<Item = &'a ExecutionAttempt>,
) -> BTreeMap<BackendId, AdapterStats> {
    let mut out: BTreeMap<BackendId, AdapterStats> = BTreeMap::new();
    for attempt in attempts {
        let entry = out.entry(attempt.adapter.clone()).or_default();
        entry.attempts += 1;
        match attempt.outcome {
            AttemptOutcome::Success => entry.successes += 1,
            AttemptOutcome::Failure { .. } => entry.failures += 1,
            AttemptOutcome::Timeout => entry.timeouts += 1,
            AttemptOutcome::Cancelled => entry.cancelled += 1,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(adapter: &str, outcome: AttemptOutcome) -> ExecutionAttempt {
        let now = Utc::now();
        ExecutionAttempt {
            execution_id: Default::default(),
            request_id: Default::default(),
            spec_id: "s".into(),
            adapter: BackendId::new(adapter),
            ordinal: 1,
            started_at: now,
            ended_at: now,
            outcome,
        }
    }

    fn record(age_minutes: i64, cause: Option<FailureCause>, now: DateTime<Utc>) -> TerminalRecord {
        TerminalRecord {
            finished_at: now - Duration::minutes(age_minutes),
            cause,
        }
    }

    #[test]
    fn empty_window_is_undefined_not_zero() {
        let now = Utc::now();
        assert_eq!(success_rate(&Vec::<TerminalRecord>::new(), Duration::hours(24), now), None);
        let stale = [record(60 * 48, None, now)];
        assert_eq!(success_rate(&stale, Duration::hours(24), now), None);
    }

    #[test]
    fn rate_counts_only_records_inside_window() {
        let now = Utc::now();
        let records = [
            record(5, None, now),
            record(10, Some(FailureCause::AllAttemptsFailed), now),
            record(20, None, now),
            record(60 * 30, Some(FailureCause::Timeout), now),
            record(1, Some(FailureCause::Cancelled), now),
        ];
        let rate = success_rate(&records, Duration::hours(24), now).unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9, "rate was {rate}");
    }

    #[test]
    fn cancelled_attempts_leave_adapter_denominator() {
        let attempts = [
            attempt("local", AttemptOutcome::Success),
            attempt("docker", AttemptOutcome::Cancelled),
            attempt("docker", AttemptOutcome::Success),
            attempt("docker", AttemptOutcome::Timeout),
        ];
        let stats = adapter_stats(&attempts);
        let docker = &stats[&BackendId::new("docker")];
        assert_eq!(docker.attempts, 3);
        assert_eq!(docker.cancelled, 1);
        assert_eq!(docker.success_rate(), Some(0.5));
        assert_eq!(stats[&BackendId::new("local")].success_rate(), Some(1.0));
    }
}
