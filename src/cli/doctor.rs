use std::sync::Arc;

use anyhow::Result;
use console::style;
use runway_runtime::adapter::{CommandRunner, TokioCommandRunner};
use runway_runtime::{ContainerAdapter, WorkflowAdapter};
use runway_types::{ExecutionAdapter, HealthState};

use super::client::GatewayClient;
use crate::config::RunwayConfig;
use crate::core::terminal::{GuideSection, health_label, print_step};

/// One line of the doctor report.
#[derive(Debug, PartialEq)]
struct Check {
    name: String,
    health: HealthState,
    detail: String,
}

fn enabled_note(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled in config" }
}

/// Probes every backend the configuration knows about, enabled or not.
async fn probe_backends(config: &RunwayConfig, runner: Arc<dyn CommandRunner>) -> Vec<Check> {
    let mut checks = Vec::new();

    let docker = ContainerAdapter::docker(&config.docker, runner.clone());
    checks.push(Check {
        name: "docker".into(),
        health: docker.probe_health().await,
        detail: format!(
            "{} via '{}'",
            enabled_note(config.docker.enabled),
            config.docker.binary
        ),
    });

    let kubernetes = ContainerAdapter::kubernetes(&config.kubernetes, runner);
    checks.push(Check {
        name: "kubernetes".into(),
        health: kubernetes.probe_health().await,
        detail: format!(
            "{} via '{}' in namespace {}",
            enabled_note(config.kubernetes.enabled),
            config.kubernetes.binary,
            config.kubernetes.namespace
        ),
    });

    match &config.workflow.api_url {
        Some(url) => match WorkflowAdapter::new(&config.workflow) {
            Ok(workflow) => checks.push(Check {
                name: "n8n".into(),
                health: workflow.probe_health().await,
                detail: url.clone(),
            }),
            Err(e) => checks.push(Check {
                name: "n8n".into(),
                health: HealthState::Unavailable,
                detail: e.to_string(),
            }),
        },
        None => checks.push(Check {
            name: "n8n".into(),
            health: HealthState::Unknown,
            detail: "not configured (set N8N_API_URL)".into(),
        }),
    }
    checks
}

pub async fn run_doctor(config: &RunwayConfig) -> Result<()> {
    print_step("Checking execution backends...");
    println!();

    let mut section = GuideSection::new("Backends");
    for check in probe_backends(config, Arc::new(TokioCommandRunner)).await {
        section = section.status(
            &check.name,
            &format!(
                "{} {}",
                health_label(check.health.as_str()),
                style(check.detail).dim()
            ),
        );
    }
    section.print();
    println!();

    let client = GatewayClient::new(config.gateway.base_url(), config.gateway.api_token.clone());
    let gateway = match client.get("/api/health").await {
        Ok(reply) if reply.succeeded() => format!(
            "{} {}",
            health_label(HealthState::Healthy.as_str()),
            style(format!(
                "runway {} at {}",
                reply.body["version"].as_str().unwrap_or("?"),
                client.base_url()
            ))
            .dim()
        ),
        _ => format!(
            "{} {}",
            style("NOT RUNNING").dim(),
            style("start it with 'runway gateway start'").dim()
        ),
    };
    let config_note = if config.config_path().exists() {
        config.config_path().display().to_string()
    } else {
        format!("{} (using defaults)", config.config_path().display())
    };
    GuideSection::new("Environment")
        .status("Gateway", &gateway)
        .status("Config", &config_note)
        .status("Database", &config.database_path().display().to_string())
        .print();
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use runway_runtime::adapter::CommandOutput;
    use std::io;
    use std::time::Duration;

    /// Only the named binary answers; everything else is "not installed".
    struct OnlyInstalled(&'static str);

    #[async_trait]
    impl CommandRunner for OnlyInstalled {
        async fn run(
            &self,
            program: &str,
            _args: &[String],
            _stdin: Option<&str>,
            _timeout: Duration,
        ) -> io::Result<CommandOutput> {
            if program == self.0 {
                Ok(CommandOutput::ok("ok"))
            } else {
                Err(io::Error::new(io::ErrorKind::NotFound, "missing"))
            }
        }
    }

    #[tokio::test]
    async fn reports_each_backend_with_its_probe_result() {
        let config = RunwayConfig::default();
        let checks = probe_backends(&config, Arc::new(OnlyInstalled("docker"))).await;

        let names: Vec<&str> = checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["docker", "kubernetes", "n8n"]);
        assert_eq!(checks[0].health, HealthState::Healthy);
        assert!(checks[0].detail.contains("disabled in config"));
        assert_eq!(checks[1].health, HealthState::Unavailable);
        assert_eq!(checks[2].health, HealthState::Unknown);
    }

    #[tokio::test]
    async fn an_invalid_workflow_url_is_reported_unavailable() {
        let mut config = RunwayConfig::default();
        config.workflow.api_url = Some("not a url".into());
        let checks = probe_backends(&config, Arc::new(OnlyInstalled("kubectl"))).await;
        assert_eq!(checks[1].health, HealthState::Healthy);
        assert_eq!(checks[2].health, HealthState::Unavailable);
    }
}
