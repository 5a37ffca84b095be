fn default_fanout() -> usize {
    2
}

/// How many candidates a request may use and in what shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionPolicy {
    PrimaryOnly,
    #[default]
    Failover,
    LoadBalance,
    Redundant {
        #[serde(default = "default_fanout")]
        fanout: usize,
    },
}

impl ExecutionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionPolicy::PrimaryOnly => "primary_only",
            ExecutionPolicy::Failover => "failover",
            ExecutionPolicy::LoadBalance => "load_balance",
            ExecutionPolicy::Redundant { .. } => "redundant",
        }
    }
}

/// What happens to running executions when their specification is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InFlightUpdatePolicy {
    /// Let them complete under the document they started with.
    #[default]
    Finish,
    /// Stop them; they resolve as `Failed{cancelled}`.
    Cancel,
}
