use chrono::{DateTime, Utc};
use runway_types::{HealthSnapshot, HealthState};

/// Hysteresis over raw probe results.
///
/// The first probe always sets the state. After that a new state is adopted only when
/// two consecutive probes report it.
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    snapshot: HealthSnapshot,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &HealthSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> HealthState {
        self.snapshot.state
    }

    /// Records one probe result. Returns the previous state when the state flipped.
    pub fn observe(&mut self, observed: HealthState, at: DateTime<Utc>) -> Option<HealthState> {
        let snap = &mut self.snapshot;
        snap.probes += 1;
        snap.last_probe = Some(at);
        let previous = snap.state;

        if previous == HealthState::Unknown {
            snap.state = observed;
            snap.pending = None;
            return (observed != previous).then_some(previous);
        }
        if observed == previous {
            snap.pending = None;
            return None;
        }
        if snap.pending == Some(observed) {
            snap.state = observed;
            snap.pending = None;
            return Some(previous);
        }
        snap.pending = Some(observed);
        None
    }
}
