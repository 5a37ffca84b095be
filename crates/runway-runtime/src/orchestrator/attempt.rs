//! Drives one attempt against one adapter: submit, poll until terminal, cancel on stop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use runway_types::{
    AgentSpecification, AttemptOutcome, ExecutionAttempt, ExecutionContext, ExecutionHandle,
    ExecutionRequest, FailureReason, RunStatus, SubmitError,
};
use serde_json::Value;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, warn};
use uuid::Uuid;

use super::scope::{RequestScope, StopReason};
use crate::health::ProbeRequester;
use crate::pool::AdapterSlot;

#[derive(Debug, Clone, Copy)]
pub(crate) struct AttemptTiming {
    pub deadline: Duration,
    pub poll_interval: Duration,
}

pub(crate) struct AttemptReport {
    pub record: ExecutionAttempt,
    pub output: Option<Value>,
    /// The backend asked to be left alone for a moment.
    pub backoff: bool,
}

enum Wake<T> {
    Stopped,
    Deadline,
    Ready(T),
}

/// Races `fut` against the scope and the attempt deadline.
async fn guarded<T>(
    scope: &RequestScope,
    deadline: Instant,
    fut: impl std::future::Future<Output = T>,
) -> Wake<T> {
    tokio::select! {
        biased;
        value = fut => Wake::Ready(value),
        _ = scope.stopped() => Wake::Stopped,
        _ = sleep_until(deadline) => Wake::Deadline,
    }
}

pub(crate) async fn run_attempt(
    slot: Arc<AdapterSlot>,
    spec: Arc<AgentSpecification>,
    request: Arc<ExecutionRequest>,
    ordinal: u32,
    scope: RequestScope,
    timing: AttemptTiming,
    probes: ProbeRequester,
) -> AttemptReport {
    let execution_id = Uuid::new_v4();
    let started_at = Utc::now();
    let deadline = Instant::now() + timing.deadline;
    let ctx = ExecutionContext {
        execution_id,
        request_id: request.request_id,
        ordinal,
        origin: request.origin,
        payload: request.payload.clone(),
    };

    let finish = |outcome: AttemptOutcome, output: Option<Value>, backoff: bool| AttemptReport {
        record: ExecutionAttempt {
            execution_id,
            request_id: request.request_id,
            spec_id: request.spec_id.clone(),
            adapter: slot.id().clone(),
            ordinal,
            started_at,
            ended_at: Utc::now(),
            outcome,
        },
        output,
        backoff,
    };

    if scope.is_stopped() {
        return finish(stop_outcome(&scope), None, false);
    }

    // A submit that lost the race may still have produced a handle; it gets cancelled too.
    let submit = slot.submit(spec, ctx);
    tokio::pin!(submit);
    let handle = match guarded(&scope, deadline, &mut submit).await {
        Wake::Ready(Ok(handle)) => handle,
        Wake::Ready(Err(err)) => {
            let backoff = matches!(err, SubmitError::Transient(_));
            if matches!(err, SubmitError::Unavailable(_)) {
                probes.request(slot.id());
            }
            warn!(
                "Attempt {} of '{}' on {} refused: {}",
                ordinal,
                request.spec_id,
                slot.id(),
                err
            );
            return finish(
                AttemptOutcome::Failure {
                    reason: FailureReason::from(err),
                },
                None,
                backoff,
            );
        }
        Wake::Stopped => {
            if let Ok(handle) = submit.await {
                cancel_once(&slot, handle).await;
            }
            return finish(stop_outcome(&scope), None, false);
        }
        Wake::Deadline => {
            if let Ok(handle) = submit.await {
                cancel_once(&slot, handle).await;
            }
            return finish(AttemptOutcome::Timeout, None, false);
        }
    };
    debug!(
        "Attempt {} of '{}' running on {} as {}",
        ordinal,
        request.spec_id,
        slot.id(),
        handle.backend_ref
    );

    loop {
        match guarded(&scope, deadline, sleep(timing.poll_interval)).await {
            Wake::Ready(()) => {}
            Wake::Stopped => {
                cancel_once(&slot, handle).await;
                return finish(stop_outcome(&scope), None, false);
            }
            Wake::Deadline => {
                warn!(
                    "Attempt {} of '{}' on {} passed its {:?} deadline",
                    ordinal,
                    request.spec_id,
                    slot.id(),
                    timing.deadline
                );
                cancel_once(&slot, handle).await;
                return finish(AttemptOutcome::Timeout, None, false);
            }
        }

        let polled = match guarded(&scope, deadline, slot.poll(handle.clone())).await {
            Wake::Ready(polled) => polled,
            Wake::Stopped => {
                cancel_once(&slot, handle).await;
                return finish(stop_outcome(&scope), None, false);
            }
            Wake::Deadline => {
                cancel_once(&slot, handle).await;
                return finish(AttemptOutcome::Timeout, None, false);
            }
        };

        match polled {
            Ok(RunStatus::Running) => {}
            Ok(RunStatus::Succeeded { output }) => {
                return finish(AttemptOutcome::Success, Some(output), false);
            }
            Ok(RunStatus::Failed { reason }) => {
                warn!(
                    "Attempt {} of '{}' failed on {}: {}",
                    ordinal,
                    request.spec_id,
                    slot.id(),
                    reason
                );
                return finish(
                    AttemptOutcome::Failure {
                        reason: FailureReason::ExecutionFailure { message: reason },
                    },
                    None,
                    false,
                );
            }
            Err(SubmitError::Transient(message)) => {
                debug!("Transient poll error from {}: {}", slot.id(), message);
            }
            Err(err) => {
                if matches!(err, SubmitError::Unavailable(_)) {
                    probes.request(slot.id());
                }
                warn!("Lost track of attempt {} on {}: {}", ordinal, slot.id(), err);
                cancel_once(&slot, handle).await;
                return finish(
                    AttemptOutcome::Failure {
                        reason: FailureReason::from(err),
                    },
                    None,
                    false,
                );
            }
        }
    }
}

fn stop_outcome(scope: &RequestScope) -> AttemptOutcome {
    match scope.reason() {
        Some(StopReason::Timeout) => AttemptOutcome::Timeout,
        _ => AttemptOutcome::Cancelled,
    }
}

/// Takes the handle by value so a second cancel for it cannot be written.
async fn cancel_once(slot: &AdapterSlot, handle: ExecutionHandle) {
    let backend_ref = handle.backend_ref.clone();
    if let Err(e) = slot.cancel(handle).await {
        warn!("Cancel of {} on {} failed: {}", backend_ref, slot.id(), e);
    }
}
