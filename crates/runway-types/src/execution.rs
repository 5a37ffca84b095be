use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SubmitError;
use crate::spec::BackendId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    Manual,
    Schedule,
    Webhook,
    FeedPoll,
    FileWatch,
    QueueMessage,
}

impl TriggerOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerOrigin::Manual => "manual",
            TriggerOrigin::Schedule => "schedule",
            TriggerOrigin::Webhook => "webhook",
            TriggerOrigin::FeedPoll => "feed_poll",
            TriggerOrigin::FileWatch => "file_watch",
            TriggerOrigin::QueueMessage => "queue_message",
        }
    }
}

/// Produced whenever a trigger fires or an operator asks for a run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionRequest {
    pub request_id: Uuid,
    pub spec_id: String,
    pub origin: TriggerOrigin,
    #[serde(default)]
    pub payload: Value,
    pub requested_at: DateTime<Utc>,
}

impl ExecutionRequest {
    pub fn new(spec_id: impl Into<String>, origin: TriggerOrigin, payload: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            spec_id: spec_id.into(),
            origin,
            payload,
            requested_at: Utc::now(),
        }
    }

    pub fn manual(spec_id: impl Into<String>) -> Self {
        Self::new(spec_id, TriggerOrigin::Manual, Value::Null)
    }
}

/// Everything an adapter receives alongside the specification on submit.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub request_id: Uuid,
    pub ordinal: u32,
    pub origin: TriggerOrigin,
    pub payload: Value,
}

/// Opaque reference to work running on a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ExecutionHandle {
    pub execution_id: Uuid,
    /// Backend-native id: container id, workflow execution id, job name...
    pub backend_ref: String,
}

impl ExecutionHandle {
    pub fn new(execution_id: Uuid, backend_ref: impl Into<String>) -> Self {
        Self {
            execution_id,
            backend_ref: backend_ref.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded {
        #[serde(default)]
        output: Value,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    UnsupportedCapability { step_id: String },
    BackendUnavailable { message: String },
    Transient { message: String },
    Rejected { message: String },
    ExecutionFailure { message: String },
}

impl FailureReason {
    /// Failures that say something about the backend rather than the agent's own logic.
    pub fn is_unavailability_class(&self) -> bool {
        matches!(
            self,
            FailureReason::UnsupportedCapability { .. } | FailureReason::BackendUnavailable { .. }
        )
    }
}

impl From<SubmitError> for FailureReason {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::UnsupportedCapability { step_id } => {
                FailureReason::UnsupportedCapability { step_id }
            }
            SubmitError::Unavailable(message) => FailureReason::BackendUnavailable { message },
            SubmitError::Transient(message) => FailureReason::Transient { message },
            SubmitError::Rejected(message) => FailureReason::Rejected { message },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure { reason: FailureReason },
    Timeout,
    /// Stopped because a concurrent attempt won or the request was withdrawn.
    Cancelled,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure { .. } => "failure",
            AttemptOutcome::Timeout => "timeout",
            AttemptOutcome::Cancelled => "cancelled",
        }
    }

    /// Whether the next candidate should be tried when load balancing.
    pub fn warrants_fallback(&self) -> bool {
        match self {
            AttemptOutcome::Timeout => true,
            AttemptOutcome::Failure { reason } => reason.is_unavailability_class(),
            _ => false,
        }
    }
}

/// One adapter-level try at running a specification. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionAttempt {
    pub execution_id: Uuid,
    pub request_id: Uuid,
    pub spec_id: String,
    pub adapter: BackendId,
    pub ordinal: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    AllAttemptsFailed,
    Timeout,
    NoEligibleAdapter,
    Cancelled,
}

impl FailureCause {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCause::AllAttemptsFailed => "all_attempts_failed",
            FailureCause::Timeout => "timeout",
            FailureCause::NoEligibleAdapter => "no_eligible_adapter",
            FailureCause::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequestOutcome {
    Succeeded {
        adapter: BackendId,
        #[serde(default)]
        output: Value,
    },
    Failed {
        cause: FailureCause,
    },
}

/// Terminal record of one execution request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionResult {
    pub request_id: Uuid,
    pub spec_id: String,
    pub origin: TriggerOrigin,
    pub outcome: RequestOutcome,
    pub attempts: Vec<ExecutionAttempt>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RequestOutcome::Succeeded { .. })
    }

    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self.outcome {
            RequestOutcome::Failed { cause } => Some(cause),
            RequestOutcome::Succeeded { .. } => None,
        }
    }
}
