use std::sync::Arc;

use async_trait::async_trait;
use runway_types::{BackendId, SubmitError};
use serde_json::{Value, json};

use super::runner::CommandRunner;
use super::{COMMAND_TIMEOUT, ContainerDriver, ContainerState, ExecutionUnit, LOG_TAIL, cli_error};

const JOB_TTL_SECS: u64 = 3600;

/// Runs each execution as a one-shot `batch/v1` Job through kubectl.
pub struct KubernetesDriver {
    binary: String,
    namespace: String,
    runner: Arc<dyn CommandRunner>,
}

impl KubernetesDriver {
    pub fn new(
        binary: impl Into<String>,
        namespace: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            binary: binary.into(),
            namespace: namespace.into(),
            runner,
        }
    }

    async fn kubectl(&self, mut args: Vec<String>, stdin: Option<&str>) -> Result<String, SubmitError> {
        args.push("-n".into());
        args.push(self.namespace.clone());
        let out = self
            .runner
            .run(&self.binary, &args, stdin, COMMAND_TIMEOUT)
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
    if message.contains("connection refused")
        || message.contains("Unable to connect to the server")
        || message.contains("Unauthorized")
        || message.contains("forbidden")
    {
        SubmitError::Unavailable(message)
    } else if message.contains("NotFound")
        || message.contains("not found")
        || message.contains("is invalid")
    {
        SubmitError::Rejected(message)
    } else {
        SubmitError::Transient(message)
    }
}

pub(super) fn job_manifest(unit: &ExecutionUnit, namespace: &str) -> Value {
    let env: Vec<Value> = unit
        .env
        .iter()
        .map(|(name, value)| json!({"name": name, "value": value}))
        .collect();
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": unit.name,
            "namespace": namespace,
            "labels": unit.labels,
        },
        "spec": {
            "backoffLimit": 0,
            "ttlSecondsAfterFinished": JOB_TTL_SECS,
            "activeDeadlineSeconds": unit.deadline_secs,
            "template": {
                "metadata": {"labels": unit.labels},
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": "runner",
                        "image": unit.image,
                        "env": env,
                        "resources": {
                            "limits": {
                                "memory": format!("{}Mi", unit.memory_mb),
                                "cpu": format!("{}m", u32::from(unit.cpu_percent) * 10),
                            }
                        }
                    }]
                }
            }
        }
    })
}

/// Parses `active,succeeded,failed` as printed by the jsonpath in `inspect`.
fn job_state(counts: &str) -> (u32, u32, u32) {
    let mut fields = counts
        .split(',')
        .map(|f| f.trim().parse::<u32>().unwrap_or(0));
    (
        fields.next().unwrap_or(0),
        fields.next().unwrap_or(0),
        fields.next().unwrap_or(0),
    )
}

#[async_trait]
impl ContainerDriver for KubernetesDriver {
    fn backend(&self) -> BackendId {
        BackendId::new(BackendId::KUBERNETES)
    }

    async fn launch(&self, unit: &ExecutionUnit) -> Result<String, SubmitError> {
        let manifest = job_manifest(unit, &self.namespace).to_string();
        self.kubectl(
            vec!["apply".into(), "-f".into(), "-".into()],
            Some(&manifest),
        )
        .await?;
        Ok(unit.name.clone())
    }

    async fn inspect(&self, reference: &str) -> Result<ContainerState, SubmitError> {
        let counts = match self
            .kubectl(
                vec![
                    "get".into(),
                    "job".into(),
                    reference.to_string(),
                    "-o".into(),
                    "jsonpath={.status.active},{.status.succeeded},{.status.failed}".into(),
                ],
                None,
            )
            .await
        {
            Ok(counts) => counts,
            Err(SubmitError::Rejected(_)) => return Ok(ContainerState::Missing),
            Err(e) => return Err(e),
        };
        let (_active, succeeded, failed) = job_state(&counts);
        if succeeded == 0 && failed == 0 {
            return Ok(ContainerState::Running);
        }
        let logs = self
            .kubectl(
                vec![
                    "logs".into(),
                    format!("job/{reference}"),
                    "--tail".into(),
                    LOG_TAIL.to_string(),
                ],
                None,
            )
            .await
            .unwrap_or_default();
        let code = if succeeded > 0 { 0 } else { 1 };
        Ok(ContainerState::Exited { code, logs })
    }

    async fn remove(&self, reference: &str) -> Result<(), SubmitError> {
        self.kubectl(
            vec![
                "delete".into(),
                "job".into(),
                reference.to_string(),
                "--ignore-not-found".into(),
                "--wait=false".into(),
            ],
            None,
        )
        .await
        .map(|_| ())
    }

    async fn ping(&self) -> Result<(), SubmitError> {
        self.kubectl(vec!["get".into(), "--raw".into(), "/readyz".into()], None)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_counts_tolerate_missing_fields() {
        assert_eq!(job_state(",,"), (0, 0, 0));
        assert_eq!(job_state("1,,"), (1, 0, 0));
        assert_eq!(job_state(",1,"), (0, 1, 0));
        assert_eq!(job_state(",,1"), (0, 0, 1));
    }
}
