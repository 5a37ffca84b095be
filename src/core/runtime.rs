//! Wires the execution runtime from configuration and runs it as a lifecycle component.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use runway_runtime::{
    AdapterRegistry, AgentManager, ContainerAdapter, ExecutionHistory, HealthMonitor,
    LocalAdapter, RuntimeOrchestrator, StepRegistry, TriggerScheduler, WorkflowAdapter,
    adapter::TokioCommandRunner,
};
use runway_storage::SpecStore;
use runway_types::{ExecutionAdapter, ExecutionRequest};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RunwayConfig;
use crate::core::lifecycle::LifecycleComponent;

const TRIGGER_QUEUE: usize = 256;
const STEP_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Registers the in-process adapter plus every backend the configuration enables.
pub fn build_registry(config: &RunwayConfig) -> Result<Arc<AdapterRegistry>> {
    let client = reqwest::Client::builder()
        .timeout(STEP_HTTP_TIMEOUT)
        .build()
        .context("Failed to build HTTP client for steps")?;
    let local = LocalAdapter::new(StepRegistry::with_builtins(client), &config.local);
    let local_permits = config.local.max_concurrent + config.local.queue_capacity;
    let mut builder = AdapterRegistry::builder(&config.orchestrator)
        .register_with_permits(Arc::new(local), local_permits.max(1));

    if config.workflow.api_url.is_some() {
        let workflow = WorkflowAdapter::new(&config.workflow)
            .context("Invalid [workflow] configuration")?;
        builder = builder.register(Arc::new(workflow) as Arc<dyn ExecutionAdapter>);
    }
    let runner = Arc::new(TokioCommandRunner);
    if config.docker.enabled {
        builder = builder.register(Arc::new(ContainerAdapter::docker(
            &config.docker,
            runner.clone(),
        )));
    }
    if config.kubernetes.enabled {
        builder = builder.register(Arc::new(ContainerAdapter::kubernetes(
            &config.kubernetes,
            runner,
        )));
    }
    Ok(builder.build())
}

/// Owns the agent manager and the background tasks that keep it fed.
pub struct RuntimeHost {
    manager: Arc<AgentManager>,
    monitor: Arc<HealthMonitor>,
    requests: Option<mpsc::Receiver<ExecutionRequest>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RuntimeHost {
    pub async fn build(config: &RunwayConfig, store: SpecStore) -> Result<Self> {
        let registry = build_registry(config)?;
        info!(
            "Registered {} adapter(s): {}",
            registry.len(),
            registry
                .ids()
                .iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let monitor = HealthMonitor::new(&registry, config.health.clone());
        let orchestrator = Arc::new(RuntimeOrchestrator::new(
            registry,
            &monitor,
            Arc::new(ExecutionHistory::with_retention(config.manager.retention())),
            config.orchestrator.clone(),
        ));
        let (tx, rx) = mpsc::channel(TRIGGER_QUEUE);
        let triggers = Arc::new(TriggerScheduler::new(tx).await?);
        let manager = AgentManager::new(
            store,
            orchestrator,
            monitor.clone(),
            triggers,
            config.manager.clone(),
        );
        Ok(Self {
            manager,
            monitor,
            requests: Some(rx),
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    pub fn manager(&self) -> Arc<AgentManager> {
        self.manager.clone()
    }
}

#[async_trait]
impl LifecycleComponent for RuntimeHost {
    fn name(&self) -> &'static str {
        "runtime"
    }

    async fn on_init(&mut self) -> Result<()> {
        self.manager.restore().await?;
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        self.tasks.push(self.monitor.spawn(self.shutdown.child_token()));
        self.manager.triggers().start().await?;
        if let Some(rx) = self.requests.take() {
            self.tasks
                .push(self.manager.spawn_dispatcher(rx, self.shutdown.child_token()));
        }
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        self.shutdown.cancel();
        self.manager.triggers().shutdown().await;
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Runtime task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_registers_only_the_local_adapter() {
        let registry = build_registry(&RunwayConfig::default()).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids()[0].as_str(), "local");
    }

    #[test]
    fn enabled_backends_register_in_a_stable_order() {
        let mut config = RunwayConfig::default();
        config.workflow.api_url = Some("http://127.0.0.1:5678/api/v1".into());
        config.docker.enabled = true;
        config.kubernetes.enabled = true;
        let registry = build_registry(&config).unwrap();
        let ids: Vec<String> = registry.ids().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["local", "n8n", "docker", "kubernetes"]);
    }

    #[test]
    fn a_bad_workflow_url_is_a_config_error() {
        let mut config = RunwayConfig::default();
        config.workflow.api_url = Some("not a url".into());
        assert!(build_registry(&config).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn host_starts_and_stops_cleanly() {
        let store = SpecStore::open_in_memory().unwrap();
        let mut host = RuntimeHost::build(&RunwayConfig::default(), store)
            .await
            .unwrap();
        host.on_init().await.unwrap();
        host.on_start().await.unwrap();
        assert!(host.manager().list().await.unwrap().is_empty());
        host.on_shutdown().await.unwrap();
    }
}
