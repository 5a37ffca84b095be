//! In-process adapter: runs specifications through linked step executors.

mod engine;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use runway_types::{
    AgentSpecification, BackendId, ExecutionAdapter, ExecutionContext, ExecutionHandle,
    HealthState, RunStatus, StepKind, SubmitError, ensure_supported,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::settings::LocalSettings;
use crate::steps::StepRegistry;

struct LocalRun {
    status: RunStatus,
    cancel: CancellationToken,
}

type Runs = Arc<Mutex<HashMap<String, LocalRun>>>;

pub struct LocalAdapter {
    id: BackendId,
    capabilities: BTreeSet<StepKind>,
    steps: Arc<StepRegistry>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    queue_capacity: usize,
    waiting: Arc<AtomicUsize>,
    runs: Runs,
}

impl LocalAdapter {
    pub fn new(steps: StepRegistry, settings: &LocalSettings) -> Self {
        let max_concurrent = settings.max_concurrent.max(1);
        Self {
            id: BackendId::local(),
            capabilities: steps.capabilities(),
            steps: Arc::new(steps),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            queue_capacity: settings.queue_capacity,
            waiting: Arc::new(AtomicUsize::new(0)),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs currently holding a permit.
    pub fn running(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Runs waiting for a permit.
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Handles still known to the adapter: unfinished, or finished but not yet polled.
    pub fn tracked(&self) -> usize {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn settle(runs: &Runs, key: &str, status: RunStatus) {
    let mut runs = runs.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(run) = runs.get_mut(key)
        && run.status == RunStatus::Running
    {
        run.status = status;
    }
}

#[async_trait]
impl ExecutionAdapter for LocalAdapter {
    fn id(&self) -> &BackendId {
        &self.id
    }

    fn capabilities(&self) -> &BTreeSet<StepKind> {
        &self.capabilities
    }

    async fn submit(
        &self,
        spec: Arc<AgentSpecification>,
        ctx: ExecutionContext,
    ) -> Result<ExecutionHandle, SubmitError> {
        ensure_supported(&spec, &self.capabilities)?;

        let ahead = self.waiting.fetch_add(1, Ordering::SeqCst);
        if ahead >= self.queue_capacity {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(SubmitError::Transient(format!(
                "local queue is full ({} waiting)",
                ahead
            )));
        }

        let key = ctx.execution_id.to_string();
        let cancel = CancellationToken::new();
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.clone(),
                LocalRun {
                    status: RunStatus::Running,
                    cancel: cancel.clone(),
                },
            );

        let handle = ExecutionHandle::new(ctx.execution_id, key.clone());
        let permits = self.permits.clone();
        let waiting = self.waiting.clone();
        let steps = self.steps.clone();
        let runs = self.runs.clone();
        tokio::spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit,
                _ = cancel.cancelled() => {
                    waiting.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            };
            waiting.fetch_sub(1, Ordering::SeqCst);
            let Ok(_permit) = permit else {
                settle(&runs, &key, RunStatus::Failed {
                    reason: "local executor shut down".into(),
                });
                return;
            };

            debug!("Local run {} of '{}' started", key, spec.id);
            let status = match engine::run_spec(&spec, &steps, &ctx, &cancel).await {
                Ok(output) => RunStatus::Succeeded { output },
                Err(reason) => RunStatus::Failed { reason },
            };
            settle(&runs, &key, status);
        });
        Ok(handle)
    }

    async fn poll(&self, handle: &ExecutionHandle) -> Result<RunStatus, SubmitError> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(run) = runs.get(&handle.backend_ref) else {
            return Err(SubmitError::Rejected(format!(
                "unknown local execution {}",
                handle.backend_ref
            )));
        };
        let status = run.status.clone();
        if status != RunStatus::Running {
            runs.remove(&handle.backend_ref);
        }
        Ok(status)
    }

    /// Stops the run and forgets its handle; nobody polls a cancelled handle.
    async fn cancel(&self, handle: &ExecutionHandle) -> Result<(), SubmitError> {
        let removed = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.backend_ref);
        if let Some(run) = removed {
            run.cancel.cancel();
            if run.status == RunStatus::Running {
                info!("Local run {} cancelled", handle.backend_ref);
            }
        }
        Ok(())
    }

    async fn probe_health(&self) -> HealthState {
        if self.permits.available_permits() == 0 {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }
}

#[cfg(test)]
mod tests;
