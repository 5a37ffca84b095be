use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unavailable,
}

impl HealthState {
    /// Sort rank used when ordering candidates; lower is preferred.
    pub fn rank(self) -> u8 {
        match self {
            HealthState::Healthy => 0,
            HealthState::Degraded => 1,
            HealthState::Unknown => 2,
            HealthState::Unavailable => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unavailable => "unavailable",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "unknown" => Some(HealthState::Unknown),
            "healthy" => Some(HealthState::Healthy),
            "degraded" => Some(HealthState::Degraded),
            "unavailable" => Some(HealthState::Unavailable),
            _ => None,
        }
    }
}

/// Last published health of one adapter.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub last_probe: Option<DateTime<Utc>>,
    /// Observation that differs from `state` and has not been confirmed yet.
    pub pending: Option<HealthState>,
    pub probes: u64,
}
