use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SubmitError;
use crate::execution::{ExecutionContext, ExecutionHandle, RunStatus};
use crate::health::HealthState;
use crate::spec::{AgentSpecification, BackendId, StepKind};

/// One execution backend behind a uniform contract.
///
/// Errors are returned as values so callers can branch on the failure kind. `submit`
/// must hand work off and return promptly; progress is observed through `poll`.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    fn id(&self) -> &BackendId;

    fn capabilities(&self) -> &BTreeSet<StepKind>;

    async fn submit(
        &self,
        spec: Arc<AgentSpecification>,
        ctx: ExecutionContext,
    ) -> Result<ExecutionHandle, SubmitError>;

    async fn poll(&self, handle: &ExecutionHandle) -> Result<RunStatus, SubmitError>;

    async fn cancel(&self, handle: &ExecutionHandle) -> Result<(), SubmitError>;

    async fn probe_health(&self) -> HealthState;
}

/// Refuses specifications containing a step kind outside `capabilities`.
pub fn ensure_supported(
    spec: &AgentSpecification,
    capabilities: &BTreeSet<StepKind>,
) -> Result<(), SubmitError> {
    match spec.first_unsupported(capabilities) {
        Some(step) => Err(SubmitError::UnsupportedCapability {
            step_id: step.id.clone(),
        }),
        None => Ok(()),
    }
}
