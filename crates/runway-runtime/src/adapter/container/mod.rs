//! Container-backed adapters: one adapter type over pluggable CLI drivers.

mod docker;
mod kubernetes;
mod runner;

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use runway_types::{
    AgentSpecification, BackendId, ExecutionAdapter, ExecutionContext, ExecutionHandle,
    HealthState, RunStatus, StepKind, SubmitError, ensure_supported,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::settings::{DockerSettings, KubernetesSettings};

pub use docker::DockerDriver;
pub use kubernetes::KubernetesDriver;
pub use runner::{CommandOutput, CommandRunner, TokioCommandRunner};

pub(crate) const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const LOG_TAIL: usize = 50;
const SLOW_PING: Duration = Duration::from_secs(2);
const NAME_LIMIT: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Exited { code: i32, logs: String },
    Missing,
}

/// Everything a driver needs to start one execution.
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub memory_mb: u32,
    pub cpu_percent: u8,
    pub deadline_secs: u64,
}

fn sanitize(raw: &str, limit: usize) -> String {
    let mut out: String = raw
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    out.truncate(limit);
    out.trim_matches('-').to_string()
}

impl ExecutionUnit {
    /// Packages `spec` and the trigger payload for a runner image.
    ///
    /// The image reads the specification from `RUNWAY_SPEC` and the payload from
    /// `RUNWAY_TRIGGER`, both base64-encoded JSON.
    pub fn package(
        spec: &AgentSpecification,
        ctx: &ExecutionContext,
        image: &str,
    ) -> Result<Self, SubmitError> {
        let spec_json = spec
            .to_json()
            .map_err(|e| SubmitError::Rejected(format!("cannot serialize spec: {e}")))?;
        let trigger_json = serde_json::to_string(&ctx.payload)
            .map_err(|e| SubmitError::Rejected(format!("cannot serialize payload: {e}")))?;

        let short = ctx.execution_id.simple().to_string();
        let name = format!("runway-{}-{}", sanitize(&spec.id, 40), &short[..8]);

        let mut env = spec.environment.clone();
        env.insert("RUNWAY_SPEC".into(), BASE64.encode(spec_json));
        env.insert("RUNWAY_TRIGGER".into(), BASE64.encode(trigger_json));
        env.insert("RUNWAY_EXECUTION_ID".into(), ctx.execution_id.to_string());
        env.insert("RUNWAY_ORIGIN".into(), ctx.origin.as_str().to_string());

        let mut labels = BTreeMap::new();
        labels.insert("runway.spec".to_string(), sanitize(&spec.id, NAME_LIMIT));
        labels.insert("runway.execution".to_string(), short);

        Ok(Self {
            name: sanitize(&name, NAME_LIMIT),
            image: image.to_string(),
            env,
            labels,
            memory_mb: spec.sla.max_memory_mb,
            cpu_percent: spec.sla.max_cpu_percent,
            deadline_secs: spec.sla.max_execution_time,
        })
    }
}

#[async_trait]
pub trait ContainerDriver: Send + Sync {
    fn backend(&self) -> BackendId;

    /// Starts the unit and returns the driver's reference to it.
    async fn launch(&self, unit: &ExecutionUnit) -> Result<String, SubmitError>;

    async fn inspect(&self, reference: &str) -> Result<ContainerState, SubmitError>;

    /// Removes the unit; removing an unknown unit succeeds.
    async fn remove(&self, reference: &str) -> Result<(), SubmitError>;

    async fn ping(&self) -> Result<(), SubmitError>;
}

pub(crate) fn cli_error(binary: &str, err: io::Error) -> SubmitError {
    match err.kind() {
        io::ErrorKind::NotFound => SubmitError::Unavailable(format!("{binary} is not installed")),
        io::ErrorKind::TimedOut => SubmitError::Transient(err.to_string()),
        _ => SubmitError::Unavailable(format!("failed to run {binary}: {err}")),
    }
}

/// Reads the last JSON line of the logs as the output, falling back to the raw text.
fn output_from_logs(logs: &str) -> Value {
    logs.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|line| serde_json::from_str::<Value>(line).ok())
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({ "logs": logs }))
}

pub struct ContainerAdapter {
    id: BackendId,
    capabilities: BTreeSet<StepKind>,
    image: String,
    driver: Arc<dyn ContainerDriver>,
}

impl ContainerAdapter {
    pub fn new(driver: Arc<dyn ContainerDriver>, image: impl Into<String>) -> Self {
        Self {
            id: driver.backend(),
            capabilities: StepKind::all(),
            image: image.into(),
            driver,
        }
    }

    pub fn docker(settings: &DockerSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(
            Arc::new(DockerDriver::new(settings.binary.clone(), runner)),
            settings.image.clone(),
        )
    }

    pub fn kubernetes(settings: &KubernetesSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(
            Arc::new(KubernetesDriver::new(
                settings.binary.clone(),
                settings.namespace.clone(),
                runner,
            )),
            settings.image.clone(),
        )
    }

    async fn cleanup(&self, reference: &str) {
        if let Err(e) = self.driver.remove(reference).await {
            warn!("[{}] Failed to remove {}: {}", self.id, reference, e);
        }
    }
}

#[async_trait]
impl ExecutionAdapter for ContainerAdapter {
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
        let unit = ExecutionUnit::package(&spec, &ctx, &self.image)?;
        let reference = self.driver.launch(&unit).await?;
        info!("[{}] Launched {} for '{}'", self.id, unit.name, spec.id);
        Ok(ExecutionHandle::new(ctx.execution_id, reference))
    }

    async fn poll(&self, handle: &ExecutionHandle) -> Result<RunStatus, SubmitError> {
        let status = match self.driver.inspect(&handle.backend_ref).await? {
            ContainerState::Running => return Ok(RunStatus::Running),
            ContainerState::Exited { code: 0, logs } => RunStatus::Succeeded {
                output: output_from_logs(&logs),
            },
            ContainerState::Exited { code, logs } => {
                let tail: Vec<&str> = logs.lines().rev().take(3).collect();
                let tail: Vec<&str> = tail.into_iter().rev().collect();
                RunStatus::Failed {
                    reason: format!("exited with code {code}: {}", tail.join(" | ")),
                }
            }
            ContainerState::Missing => RunStatus::Failed {
                reason: format!("{} disappeared", handle.backend_ref),
            },
        };
        debug!("[{}] {} finished", self.id, handle.backend_ref);
        self.cleanup(&handle.backend_ref).await;
        Ok(status)
    }

    async fn cancel(&self, handle: &ExecutionHandle) -> Result<(), SubmitError> {
        info!("[{}] Cancelling {}", self.id, handle.backend_ref);
        self.driver.remove(&handle.backend_ref).await
    }

    async fn probe_health(&self) -> HealthState {
        let started = Instant::now();
        match self.driver.ping().await {
            Ok(()) if started.elapsed() > SLOW_PING => HealthState::Degraded,
            Ok(()) => HealthState::Healthy,
            Err(SubmitError::Transient(_)) => HealthState::Degraded,
            Err(e) => {
                debug!("[{}] Probe failed: {}", self.id, e);
                HealthState::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests;
