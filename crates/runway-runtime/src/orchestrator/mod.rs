//! Turns an execution request into attempts across adapters.
//!
//! Candidates are ordered by preference, health and registration, the configured
//! policy decides how many of them may run and in what shape, and every attempt is
//! appended to the history as it finishes.

mod attempt;
mod scope;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use runway_core::{Advance, AttemptPlan, CandidateView, TerminalRecord, order_candidates, plan_attempts};
use runway_types::{
    AgentSpecification, BackendId, ExecutionAttempt, ExecutionPolicy, ExecutionRequest,
    ExecutionResult, FailureCause, HealthState, RequestOutcome,
};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub use scope::{RequestScope, StopReason};

use self::attempt::{AttemptTiming, run_attempt};
use crate::health::{HealthBoard, HealthMonitor, ProbeRequester};
use crate::history::ExecutionHistory;
use crate::pool::AdapterSlot;
use crate::registry::AdapterRegistry;
use crate::settings::OrchestratorSettings;

enum Drive {
    NoCandidates,
    Finished {
        attempts: Vec<ExecutionAttempt>,
        winner: Option<(BackendId, Value)>,
    },
}

pub struct RuntimeOrchestrator {
    registry: Arc<AdapterRegistry>,
    health: HealthBoard,
    probes: ProbeRequester,
    history: Arc<ExecutionHistory>,
    settings: OrchestratorSettings,
    turn: AtomicUsize,
}

impl RuntimeOrchestrator {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        monitor: &HealthMonitor,
        history: Arc<ExecutionHistory>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            health: monitor.board(),
            probes: monitor.requester(),
            history,
            settings,
            turn: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn history(&self) -> &Arc<ExecutionHistory> {
        &self.history
    }

    pub fn health(&self) -> &HealthBoard {
        &self.health
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Eligible adapters for `spec`, best first, with the health they were ranked by.
    pub fn candidates(&self, spec: &AgentSpecification) -> Vec<(Arc<AdapterSlot>, HealthState)> {
        let slots = self.registry.slots();
        let healths: Vec<HealthState> = slots
            .iter()
            .map(|s| self.health.current(s.id()))
            .collect();
        let views: Vec<CandidateView<'_>> = slots
            .iter()
            .zip(&healths)
            .map(|(slot, health)| CandidateView {
                id: slot.id(),
                capabilities: slot.adapter().capabilities(),
                health: *health,
                registration: slot.registration(),
            })
            .collect();
        order_candidates(spec, &views)
            .into_iter()
            .map(|idx| (slots[idx].clone(), healths[idx]))
            .collect()
    }

    /// Runs `request` to a terminal state under the configured policy.
    ///
    /// `timeout` bounds the whole request; when it elapses every in-flight handle is
    /// cancelled and the request fails with `Timeout`.
    pub async fn execute(
        &self,
        spec: Arc<AgentSpecification>,
        request: ExecutionRequest,
        scope: RequestScope,
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let request = Arc::new(request);
        info!(
            "Request {} for '{}' ({}) started",
            request.request_id,
            spec.id,
            request.origin.as_str()
        );

        let timer = timeout.map(|limit| {
            let scope = scope.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                scope.stop(StopReason::Timeout);
            })
        });
        let drive = self.drive(spec.clone(), request.clone(), scope.clone()).await;
        if let Some(timer) = timer {
            timer.abort();
        }

        let (attempts, outcome) = match drive {
            Drive::NoCandidates => {
                warn!("No adapter can run '{}'", spec.id);
                (
                    Vec::new(),
                    RequestOutcome::Failed {
                        cause: FailureCause::NoEligibleAdapter,
                    },
                )
            }
            Drive::Finished {
                attempts,
                winner: Some((adapter, output)),
            } => (attempts, RequestOutcome::Succeeded { adapter, output }),
            Drive::Finished {
                attempts,
                winner: None,
            } => {
                let cause = match scope.reason() {
                    Some(StopReason::Timeout) => FailureCause::Timeout,
                    Some(StopReason::Withdrawn) => FailureCause::Cancelled,
                    _ => FailureCause::AllAttemptsFailed,
                };
                (attempts, RequestOutcome::Failed { cause })
            }
        };

        let result = ExecutionResult {
            request_id: request.request_id,
            spec_id: request.spec_id.clone(),
            origin: request.origin,
            outcome,
            attempts,
            started_at,
            finished_at: Utc::now(),
        };
        self.history.record_terminal(
            &result.spec_id,
            TerminalRecord {
                finished_at: result.finished_at,
                cause: result.failure_cause(),
            },
        );
        match &result.outcome {
            RequestOutcome::Succeeded { adapter, .. } => info!(
                "Request {} for '{}' succeeded on {} after {} attempt(s)",
                result.request_id,
                result.spec_id,
                adapter,
                result.attempts.len()
            ),
            RequestOutcome::Failed { cause } => warn!(
                "Request {} for '{}' failed ({}) after {} attempt(s)",
                result.request_id,
                result.spec_id,
                cause.as_str(),
                result.attempts.len()
            ),
        }
        result
    }

    async fn drive(
        &self,
        spec: Arc<AgentSpecification>,
        request: Arc<ExecutionRequest>,
        scope: RequestScope,
    ) -> Drive {
        let candidates = self.candidates(&spec);
        if candidates.is_empty() {
            return Drive::NoCandidates;
        }
        let ranked: Vec<(usize, HealthState)> = candidates
            .iter()
            .enumerate()
            .map(|(i, (_, health))| (i, *health))
            .collect();
        let turn = match self.settings.policy {
            ExecutionPolicy::LoadBalance => self.turn.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
        let plan = plan_attempts(self.settings.policy, &ranked, turn);
        debug!(
            "Plan for '{}' under {}: {} candidate(s)",
            spec.id,
            self.settings.policy.as_str(),
            plan.len()
        );
        let timing = AttemptTiming {
            deadline: spec
                .sla
                .execution_deadline()
                .min(self.settings.attempt_deadline_cap()),
            poll_interval: self.settings.poll_interval(),
        };
        let pick = |indices: Vec<usize>| -> Vec<Arc<AdapterSlot>> {
            indices
                .into_iter()
                .map(|i| candidates[i].0.clone())
                .collect()
        };

        match plan {
            AttemptPlan::Sequential { order, advance } => {
                self.run_sequential(spec, request, pick(order), advance, scope, timing)
                    .await
            }
            AttemptPlan::Concurrent { set } => {
                self.run_concurrent(spec, request, pick(set), scope, timing)
                    .await
            }
        }
    }

    async fn run_sequential(
        &self,
        spec: Arc<AgentSpecification>,
        request: Arc<ExecutionRequest>,
        order: Vec<Arc<AdapterSlot>>,
        advance: Advance,
        scope: RequestScope,
        timing: AttemptTiming,
    ) -> Drive {
        let mut attempts = Vec::with_capacity(order.len());
        let mut transient_streak = 0u32;
        let total = order.len();

        for (i, slot) in order.into_iter().enumerate() {
            if scope.is_stopped() {
                break;
            }
            let report = run_attempt(
                slot,
                spec.clone(),
                request.clone(),
                (i + 1) as u32,
                scope.clone(),
                timing,
                self.probes.clone(),
            )
            .await;
            self.history.append_attempt(report.record.clone());
            let outcome = report.record.outcome.clone();
            let adapter = report.record.adapter.clone();
            attempts.push(report.record);

            if outcome.is_success() {
                return Drive::Finished {
                    attempts,
                    winner: Some((adapter, report.output.unwrap_or(Value::Null))),
                };
            }
            if scope.is_stopped() {
                break;
            }
            if !advance.moves_on(i, &outcome) {
                debug!(
                    "Attempt on {} failed with {}; not falling back",
                    adapter,
                    outcome.as_str()
                );
                break;
            }
            if report.backoff {
                transient_streak += 1;
                if i + 1 < total {
                    let delay = self.backoff_delay(transient_streak);
                    debug!("Backing off {:?} before the next candidate", delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = scope.stopped() => break,
                    }
                }
            } else {
                transient_streak = 0;
            }
        }
        Drive::Finished {
            attempts,
            winner: None,
        }
    }

    async fn run_concurrent(
        &self,
        spec: Arc<AgentSpecification>,
        request: Arc<ExecutionRequest>,
        set: Vec<Arc<AdapterSlot>>,
        scope: RequestScope,
        timing: AttemptTiming,
    ) -> Drive {
        let mut tasks = JoinSet::new();
        let mut branches = Vec::with_capacity(set.len());
        for (i, slot) in set.into_iter().enumerate() {
            let branch = scope.child();
            branches.push(branch.clone());
            tasks.spawn(run_attempt(
                slot,
                spec.clone(),
                request.clone(),
                (i + 1) as u32,
                branch,
                timing,
                self.probes.clone(),
            ));
        }

        // Losers are stopped as soon as one attempt wins; their cancels finish before
        // the set drains, so the request never resolves ahead of them.
        let mut reports = Vec::with_capacity(branches.len());
        let mut winner = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    if winner.is_none() && report.record.outcome.is_success() {
                        winner = Some((
                            report.record.adapter.clone(),
                            report.output.clone().unwrap_or(Value::Null),
                        ));
                        for branch in &branches {
                            branch.stop(StopReason::Superseded);
                        }
                    }
                    reports.push(report.record);
                }
                Err(e) => warn!("Redundant attempt task for '{}' died: {}", spec.id, e),
            }
        }

        reports.sort_by_key(|a| a.ordinal);
        self.history.append_attempts(&spec.id, reports.iter().cloned());
        Drive::Finished {
            attempts: reports,
            winner,
        }
    }

    /// Exponential in the number of consecutive transient refusals, capped, with jitter.
    fn backoff_delay(&self, streak: u32) -> Duration {
        let base = self.settings.backoff_base().as_millis() as u64;
        let cap = self.settings.backoff_cap().as_millis() as u64;
        let exp = base.saturating_mul(1u64 << streak.saturating_sub(1).min(16));
        let ceiling = exp.min(cap);
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let half = ceiling / 2;
        let jitter = rand::thread_rng().gen_range(0..=half);
        Duration::from_millis(ceiling - half + jitter)
    }
}

#[cfg(test)]
mod tests;
