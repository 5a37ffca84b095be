//! Shared data model for runway: specifications, execution records and the
//! contracts implemented by execution backends and step executors.

pub mod adapter;
pub mod error;
pub mod execution;
pub mod health;
pub mod policy;
pub mod spec;
pub mod step;

pub use adapter::{ExecutionAdapter, ensure_supported};
pub use error::{StepError, SubmitError, ValidationError};
pub use execution::{
    AttemptOutcome, ExecutionAttempt, ExecutionContext, ExecutionHandle, ExecutionRequest,
    ExecutionResult, FailureCause, FailureReason, RequestOutcome, RunStatus, TriggerOrigin,
};
pub use health::{HealthSnapshot, HealthState};
pub use policy::{ExecutionPolicy, InFlightUpdatePolicy};
pub use spec::{
    AgentSpecification, BackendId, Extensible, Metadata, OnError, Priority, RetryPolicy, Sla, Step,
    StepAction, StepKind, Trigger, TriggerKind,
};
pub use step::{StepContext, StepExecutor};

#[cfg(test)]
mod tests;
