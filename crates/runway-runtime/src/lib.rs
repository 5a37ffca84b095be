//! Execution runtime for runway: adapters, health monitoring, orchestration,
//! trigger scheduling and the agent manager built on top of them.

pub mod adapter;
pub mod health;
pub mod history;
pub mod manager;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod settings;
pub mod steps;
pub mod triggers;

pub use adapter::{ContainerAdapter, LocalAdapter, WorkflowAdapter};
pub use health::{HealthBoard, HealthMonitor, ProbeRequester};
pub use history::{ExecutionHistory, Retention};
pub use manager::{AgentManager, AgentStatus, AgentSummary, ManagerError, RuntimeStatus, UpdateOutcome};
pub use orchestrator::{RequestScope, RuntimeOrchestrator, StopReason};
pub use pool::AdapterSlot;
pub use registry::{AdapterRegistry, AdapterRegistryBuilder};
pub use settings::{
    DockerSettings, HealthSettings, KubernetesSettings, LocalSettings, ManagerSettings,
    OrchestratorSettings, WorkflowSettings,
};
pub use steps::StepRegistry;
pub use triggers::{ExternalBinding, TriggerError, TriggerScheduler, WebhookRoute};
