use std::sync::Arc;

use async_trait::async_trait;
use runway_types::{BackendId, SubmitError};

use super::runner::CommandRunner;
use super::{COMMAND_TIMEOUT, ContainerDriver, ContainerState, ExecutionUnit, LOG_TAIL, cli_error};

/// Drives the Docker CLI. Containers are kept after exit so their status can be read.
pub struct DockerDriver {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl DockerDriver {
    pub fn new(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    async fn docker(&self, args: Vec<String>) -> Result<String, SubmitError> {
        let out = self
            .runner
            .run(&self.binary, &args, None, COMMAND_TIMEOUT)
            .await
            .map_err(|e| cli_error(&self.binary, e))?;
        if out.success() {
            Ok(out.stdout.trim().to_string())
        } else {
            Err(classify(&out.stderr))
        }
    }
}

fn classify(stderr: &str) -> SubmitError {
    let message = stderr.trim().to_string();
    if message.contains("Cannot connect to the Docker daemon")
        || message.contains("permission denied while trying to connect")
    {
        SubmitError::Unavailable(message)
    } else if message.contains("No such object")
        || message.contains("No such container")
        || message.contains("pull access denied")
        || message.contains("invalid reference format")
        || message.contains("Unable to find image")
    {
        SubmitError::Rejected(message)
    } else {
        SubmitError::Transient(message)
    }
}

pub(super) fn run_args(unit: &ExecutionUnit) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "-d".into(),
        "--rm=false".into(),
        "--name".into(),
        unit.name.clone(),
    ];
    for (key, value) in &unit.labels {
        args.push("--label".into());
        args.push(format!("{key}={value}"));
    }
    args.push("--memory".into());
    args.push(format!("{}m", unit.memory_mb));
    args.push("--cpus".into());
    args.push(format!("{:.2}", f64::from(unit.cpu_percent) / 100.0));
    for (key, value) in &unit.env {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }
    args.push(unit.image.clone());
    args
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    fn backend(&self) -> BackendId {
        BackendId::new(BackendId::DOCKER)
    }

    async fn launch(&self, unit: &ExecutionUnit) -> Result<String, SubmitError> {
        let id = self.docker(run_args(unit)).await?;
        if id.is_empty() {
            return Err(SubmitError::Transient("docker run printed no container id".into()));
        }
        Ok(id)
    }

    async fn inspect(&self, reference: &str) -> Result<ContainerState, SubmitError> {
        let state = match self
            .docker(vec![
                "inspect".into(),
                "--format".into(),
                "{{.State.Status}} {{.State.ExitCode}}".into(),
                reference.to_string(),
            ])
            .await
        {
            Ok(state) => state,
            Err(SubmitError::Rejected(_)) => return Ok(ContainerState::Missing),
            Err(e) => return Err(e),
        };
        let mut parts = state.split_whitespace();
        let status = parts.next().unwrap_or_default();
        let code: i32 = parts.next().and_then(|c| c.parse().ok()).unwrap_or(-1);
        match status {
            "created" | "running" | "restarting" | "paused" => Ok(ContainerState::Running),
            "exited" | "dead" => {
                let logs = self
                    .docker(vec![
                        "logs".into(),
                        "--tail".into(),
                        LOG_TAIL.to_string(),
                        reference.to_string(),
                    ])
                    .await
                    .unwrap_or_default();
                Ok(ContainerState::Exited { code, logs })
            }
            _ => Ok(ContainerState::Missing),
        }
    }

    async fn remove(&self, reference: &str) -> Result<(), SubmitError> {
        match self
            .docker(vec!["rm".into(), "-f".into(), reference.to_string()])
            .await
        {
            Ok(_) | Err(SubmitError::Rejected(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn ping(&self) -> Result<(), SubmitError> {
        self.docker(vec![
            "info".into(),
            "--format".into(),
            "{{.ServerVersion}}".into(),
        ])
        .await
        .map(|_| ())
    }
}
