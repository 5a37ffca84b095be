//! Sequential in-process interpreter for one specification.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use runway_core::predicate;
use runway_types::spec::BackoffKind;
use runway_types::{
    AgentSpecification, ExecutionContext, OnError, Step, StepAction, StepContext, StepError,
    StepExecutor,
};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::steps::StepRegistry;

const MAX_NESTING: usize = 16;
const DEFAULT_LOOP_LIMIT: u32 = 100;
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(30);

type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

struct Engine<'a> {
    spec: &'a AgentSpecification,
    steps: &'a StepRegistry,
    cancel: &'a CancellationToken,
}

/// Runs every top-level step in order and returns the outputs keyed by step id.
///
/// Steps named as a branch or loop body only run when their control step hands
/// control to them.
pub(crate) async fn run_spec(
    spec: &AgentSpecification,
    steps: &StepRegistry,
    exec: &ExecutionContext,
    cancel: &CancellationToken,
) -> Result<Value, String> {
    let mut ctx = StepContext {
        spec_id: spec.id.clone(),
        execution_id: exec.execution_id,
        trigger_payload: exec.payload.clone(),
        outputs: Map::new(),
        environment: spec.environment.clone(),
    };
    let owned: HashSet<&str> = spec
        .steps
        .iter()
        .flat_map(|s| s.action.branch_targets())
        .collect();
    let engine = Engine {
        spec,
        steps,
        cancel,
    };
    for step in spec.steps.iter().filter(|s| !owned.contains(s.id.as_str())) {
        engine.run_step(step, &mut ctx, 0).await?;
    }
    Ok(Value::Object(ctx.outputs))
}

impl<'a> Engine<'a> {
    fn run_step<'s>(&'s self, step: &'s Step, ctx: &'s mut StepContext, depth: usize) -> StepFuture<'s> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return Err("cancelled".to_string());
            }
            if depth > MAX_NESTING {
                return Err(format!("step '{}' is nested too deeply", step.id));
            }
            if let Some(condition) = &step.condition
                && !predicate::evaluate(condition, ctx)
            {
                debug!("Skipping step '{}': condition is false", step.id);
                ctx.outputs
                    .insert(step.id.clone(), json!({ "skipped": true }));
                return Ok(());
            }

            match &*step.action {
                StepAction::Conditional {
                    predicate: expression,
                    then_branch,
                    else_branch,
                } => {
                    let taken = predicate::evaluate(expression, ctx);
                    ctx.outputs.insert(
                        step.id.clone(),
                        json!({ "branch": if taken { "then" } else { "else" } }),
                    );
                    let targets = if taken { then_branch } else { else_branch };
                    for target in targets {
                        let next = self.lookup(target)?;
                        self.run_step(next, ctx, depth + 1).await?;
                    }
                    Ok(())
                }
                StepAction::Loop {
                    condition,
                    body,
                    max_iterations,
                } => {
                    let limit = max_iterations.unwrap_or(DEFAULT_LOOP_LIMIT);
                    let mut iteration = 0u32;
                    loop {
                        ctx.outputs
                            .insert(step.id.clone(), json!({ "iteration": iteration }));
                        if iteration >= limit || !predicate::evaluate(condition, ctx) {
                            break;
                        }
                        for target in body {
                            let next = self.lookup(target)?;
                            self.run_step(next, ctx, depth + 1).await?;
                        }
                        iteration += 1;
                    }
                    ctx.outputs
                        .insert(step.id.clone(), json!({ "iterations": iteration }));
                    Ok(())
                }
                StepAction::Delay { duration_secs } => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(*duration_secs)) => {}
                        _ = self.cancel.cancelled() => return Err("cancelled".to_string()),
                    }
                    ctx.outputs
                        .insert(step.id.clone(), json!({ "delayed_secs": duration_secs }));
                    Ok(())
                }
                action => {
                    let kind = action.kind();
                    let executor = self
                        .steps
                        .get(kind)
                        .ok_or_else(|| format!("no executor registered for {kind}"))?;
                    match self.invoke(executor, step, ctx).await {
                        Ok(output) => {
                            ctx.outputs.insert(step.id.clone(), output);
                        }
                        Err(e) if step.on_error == OnError::Continue => {
                            warn!("Step '{}' failed, continuing: {}", step.id, e);
                            ctx.outputs
                                .insert(step.id.clone(), json!({ "error": e.to_string() }));
                        }
                        Err(e) => return Err(format!("step '{}' failed: {}", step.id, e)),
                    }
                    Ok(())
                }
            }
        })
    }

    fn lookup(&self, id: &str) -> Result<&'a Step, String> {
        self.spec
            .step(id)
            .ok_or_else(|| format!("unknown step '{id}'"))
    }

    async fn invoke(
        &self,
        executor: Arc<dyn StepExecutor>,
        step: &Step,
        ctx: &StepContext,
    ) -> Result<Value, StepError> {
        let attempts = step.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                r = executor.execute(step, ctx) => r,
                _ = self.cancel.cancelled() => return Err(StepError::Failed("cancelled".into())),
            };
            match result {
                Ok(output) => return Ok(output),
                Err(StepError::Config(msg)) => return Err(StepError::Config(msg)),
                Err(e) if attempt < attempts => {
                    let delay = match step.retry.backoff {
                        BackoffKind::Fixed => RETRY_BASE,
                        BackoffKind::Exponential => {
                            (RETRY_BASE * 2u32.saturating_pow(attempt - 1)).min(RETRY_CAP)
                        }
                    };
                    debug!(
                        "Step '{}' attempt {}/{} failed ({}); retrying in {:?}",
                        step.id, attempt, attempts, e, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(StepError::Failed("cancelled".into())),
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
