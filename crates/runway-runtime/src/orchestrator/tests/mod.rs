mod load_balance;

use std::sync::Arc;
use std::time::Duration;

use runway_test_utils::ScriptedAdapter;
use runway_types::{
    AgentSpecification, ExecutionAdapter, ExecutionPolicy, ExecutionRequest, ExecutionResult,
};

use super::{RequestScope, RuntimeOrchestrator};
use crate::health::HealthMonitor;
use crate::history::ExecutionHistory;
use crate::registry::AdapterRegistry;
use crate::settings::{HealthSettings, OrchestratorSettings};

struct Harness {
    orchestrator: RuntimeOrchestrator,
    monitor: Arc<HealthMonitor>,
    history: Arc<ExecutionHistory>,
}

fn harness(adapters: &[Arc<ScriptedAdapter>], policy: ExecutionPolicy) -> Harness {
    let settings = OrchestratorSettings {
        policy,
        poll_interval_ms: 100,
        ..OrchestratorSettings::default()
    };
    let mut builder = AdapterRegistry::builder(&settings);
    for adapter in adapters {
        builder = builder.register(adapter.clone() as Arc<dyn ExecutionAdapter>);
    }
    let registry = builder.build();
    let monitor = HealthMonitor::new(&registry, HealthSettings::default());
    let history = Arc::new(ExecutionHistory::new());
    Harness {
        orchestrator: RuntimeOrchestrator::new(registry, &monitor, history.clone(), settings),
        monitor,
        history,
    }
}

impl Harness {
    async fn run(&self, spec: AgentSpecification) -> ExecutionResult {
        self.run_with(spec, RequestScope::new(), None).await
    }

    async fn run_with(
        &self,
        spec: AgentSpecification,
        scope: RequestScope,
        timeout: Option<Duration>,
    ) -> ExecutionResult {
        let request = ExecutionRequest::manual(spec.id.clone());
        self.orchestrator
            .execute(Arc::new(spec), request, scope, timeout)
            .await
    }
}

fn adapters_of(result: &ExecutionResult) -> Vec<String> {
    result
        .attempts
        .iter()
        .map(|a| a.adapter.to_string())
        .collect()
}
