//! Agent lifecycle: validation, persistence, trigger binding and delegation to the
//! orchestrator.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use runway_core::{AdapterStats, validate};
use runway_storage::{SaveOutcome, SpecStore, SpecVersion, StoreError, StoredSpec};
use runway_types::{
    AgentSpecification, BackendId, ExecutionAttempt, ExecutionRequest, ExecutionResult,
    HealthState, InFlightUpdatePolicy, StepKind, TriggerOrigin, ValidationError,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::health::HealthMonitor;
use crate::orchestrator::{RequestScope, RuntimeOrchestrator, StopReason};
use crate::settings::ManagerSettings;
use crate::triggers::{TriggerError, TriggerScheduler};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("agent '{0}' not found")]
    NotFound(String),
    #[error("agent '{0}' already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("storage error: {0}")]
    Storage(StoreError),
    #[error("trigger error: {0}")]
    Trigger(#[from] TriggerError),
    #[error("execution task failed: {0}")]
    Execution(String),
}

impl From<StoreError> for ManagerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(id) => ManagerError::AlreadyExists(id),
            StoreError::NotFound(id) => ManagerError::NotFound(id),
            other => ManagerError::Storage(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Unchanged { version: u32 },
    Updated { version: u32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub version: u32,
    pub content_hash: String,
    pub triggers: Vec<String>,
    pub steps: usize,
    pub runtime_preferences: Vec<BackendId>,
    pub updated_at: DateTime<Utc>,
}

impl From<&StoredSpec> for AgentSummary {
    fn from(stored: &StoredSpec) -> Self {
        let spec = &stored.spec;
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            owner: spec.owner.clone(),
            version: stored.version,
            content_hash: stored.content_hash.clone(),
            triggers: spec
                .triggers
                .iter()
                .filter(|t| t.enabled)
                .map(|t| t.kind.as_str().to_string())
                .collect(),
            steps: spec.steps.len(),
            runtime_preferences: spec.runtime_preferences.clone(),
            updated_at: stored.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub active: bool,
    pub health: BTreeMap<BackendId, HealthState>,
    pub recent_attempts: Vec<ExecutionAttempt>,
    pub success_rate: Option<f64>,
    pub adapter_stats: BTreeMap<BackendId, AdapterStats>,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub id: BackendId,
    pub health: HealthState,
    pub capabilities: Vec<StepKind>,
    pub last_probe: Option<DateTime<Utc>>,
    pub pending: Option<HealthState>,
    pub capacity: usize,
    pub available: usize,
}

type InFlight = StdMutex<HashMap<String, HashMap<Uuid, RequestScope>>>;

fn forget_in_flight(in_flight: &InFlight, spec_id: &str, request_id: Uuid) {
    let mut in_flight = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(scopes) = in_flight.get_mut(spec_id) {
        scopes.remove(&request_id);
        if scopes.is_empty() {
            in_flight.remove(spec_id);
        }
    }
}

/// Withdraws the request when the caller stops waiting before it finishes.
struct WithdrawOnDrop(Option<RequestScope>);

impl WithdrawOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for WithdrawOnDrop {
    fn drop(&mut self) {
        if let Some(scope) = self.0.take() {
            scope.stop(StopReason::Withdrawn);
        }
    }
}

pub struct AgentManager {
    store: SpecStore,
    orchestrator: Arc<RuntimeOrchestrator>,
    monitor: Arc<HealthMonitor>,
    triggers: Arc<TriggerScheduler>,
    settings: ManagerSettings,
    in_flight: Arc<InFlight>,
}

impl AgentManager {
    pub fn new(
        store: SpecStore,
        orchestrator: Arc<RuntimeOrchestrator>,
        monitor: Arc<HealthMonitor>,
        triggers: Arc<TriggerScheduler>,
        settings: ManagerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            orchestrator,
            monitor,
            triggers,
            settings,
            in_flight: Arc::new(StdMutex::new(HashMap::new())),
        })
    }

    pub fn store(&self) -> &SpecStore {
        &self.store
    }

    pub fn triggers(&self) -> &Arc<TriggerScheduler> {
        &self.triggers
    }

    pub fn orchestrator(&self) -> &Arc<RuntimeOrchestrator> {
        &self.orchestrator
    }

    /// Re-binds the triggers of every active agent and seeds the history with the
    /// results that still fall inside the success-rate window.
    pub async fn restore(&self) -> Result<usize, ManagerError> {
        let since = Utc::now() - self.settings.success_window();
        let results = self.store.results_since(since).await?;
        self.orchestrator.history().seed(&results);

        let specs = self.store.list_specs(false).await?;
        let mut bound = 0;
        for stored in &specs {
            match self.triggers.bind(&stored.spec).await {
                Ok(_) => bound += 1,
                Err(e) => warn!("Could not bind triggers of '{}': {}", stored.spec.id, e),
            }
        }
        info!(
            "Restored {} agent(s) and {} recent result(s)",
            bound,
            results.len()
        );
        Ok(bound)
    }

    // --- Lifecycle ---

    pub async fn create(&self, mut spec: AgentSpecification) -> Result<String, ManagerError> {
        if spec.id.trim().is_empty() {
            spec.id = Uuid::new_v4().to_string();
        }
        if spec.metadata.created_at.is_none() {
            spec.metadata.created_at = Some(Utc::now());
        }
        validate(&spec)?;
        if self.store.get_spec(&spec.id).await?.is_some() {
            return Err(ManagerError::AlreadyExists(spec.id));
        }

        self.triggers.bind(&spec).await?;
        if let Err(e) = self.store.insert_spec(&spec).await {
            self.triggers.unbind(&spec.id).await;
            return Err(e.into());
        }
        info!("Created agent '{}' ({})", spec.id, spec.name);
        Ok(spec.id)
    }

    pub async fn update(
        &self,
        id: &str,
        mut spec: AgentSpecification,
    ) -> Result<UpdateOutcome, ManagerError> {
        if spec.id.is_empty() {
            spec.id = id.to_string();
        }
        if spec.id != id {
            return Err(ValidationError::new("id", "cannot change after creation").into());
        }
        let current = self.active(id).await?;
        if spec.metadata.created_at.is_none() {
            spec.metadata.created_at = current.spec.metadata.created_at;
        }
        validate(&spec)?;
        if spec.content_hash() == current.content_hash {
            return Ok(UpdateOutcome::Unchanged {
                version: current.version,
            });
        }

        if let Err(e) = self.triggers.bind(&spec).await {
            self.rebind(&current.spec).await;
            return Err(e.into());
        }
        let version = match self.store.replace_spec(&spec).await {
            Ok(SaveOutcome::Saved { version }) => version,
            Ok(SaveOutcome::Unchanged { version }) => {
                return Ok(UpdateOutcome::Unchanged { version });
            }
            Err(e) => {
                self.rebind(&current.spec).await;
                return Err(e.into());
            }
        };

        let withdrawn = self.apply_in_flight_policy(id);
        info!(
            "Updated agent '{}' to version {} ({} in-flight request(s) withdrawn)",
            id, version, withdrawn
        );
        Ok(UpdateOutcome::Updated { version })
    }

    /// Soft delete: the document and its history stay, triggers are released.
    pub async fn delete(&self, id: &str) -> Result<(), ManagerError> {
        if !self.store.deactivate_spec(id).await? {
            return Err(ManagerError::NotFound(id.to_string()));
        }
        self.triggers.unbind(id).await;
        let withdrawn = self.apply_in_flight_policy(id);
        info!("Deleted agent '{}' ({} in-flight request(s) withdrawn)", id, withdrawn);
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<AgentSummary>, ManagerError> {
        let specs = self.store.list_specs(false).await?;
        Ok(specs.iter().map(AgentSummary::from).collect())
    }

    pub async fn get(&self, id: &str) -> Result<StoredSpec, ManagerError> {
        self.active(id).await
    }

    pub async fn versions(&self, id: &str) -> Result<Vec<SpecVersion>, ManagerError> {
        let versions = self.store.spec_versions(id).await?;
        if versions.is_empty() {
            return Err(ManagerError::NotFound(id.to_string()));
        }
        Ok(versions)
    }

    async fn active(&self, id: &str) -> Result<StoredSpec, ManagerError> {
        match self.store.get_spec(id).await? {
            Some(stored) if stored.active => Ok(stored),
            _ => Err(ManagerError::NotFound(id.to_string())),
        }
    }

    async fn rebind(&self, spec: &AgentSpecification) {
        if let Err(e) = self.triggers.bind(spec).await {
            error!("Could not restore triggers of '{}': {}", spec.id, e);
        }
    }

    fn apply_in_flight_policy(&self, id: &str) -> usize {
        if self.settings.in_flight_updates != InFlightUpdatePolicy::Cancel {
            return 0;
        }
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(scopes) = in_flight.get(id) else {
            return 0;
        };
        for scope in scopes.values() {
            scope.stop(StopReason::Withdrawn);
        }
        scopes.len()
    }

    // --- Execution ---

    /// Runs `request` to a terminal state and persists the result.
    ///
    /// `timeout` falls back to the orchestrator's configured request timeout. The
    /// request runs on its own task; dropping the returned future withdraws it, and
    /// that task still cancels its attempts and records the result.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, ManagerError> {
        let stored = self.active(&request.spec_id).await?;
        let spec_id = request.spec_id.clone();
        let request_id = request.request_id;
        let scope = RequestScope::new();
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(spec_id.clone())
            .or_default()
            .insert(request_id, scope.clone());

        let timeout = timeout.or_else(|| self.orchestrator.settings().request_timeout());
        let guard = WithdrawOnDrop(Some(scope.clone()));
        let orchestrator = self.orchestrator.clone();
        let store = self.store.clone();
        let in_flight = self.in_flight.clone();
        let task = tokio::spawn(async move {
            let result = orchestrator
                .execute(Arc::new(stored.spec), request, scope, timeout)
                .await;
            forget_in_flight(&in_flight, &spec_id, request_id);
            if let Err(e) = store.record_result(&result).await {
                error!("Failed to persist result {}: {}", result.request_id, e);
            }
            result
        });

        let joined = task.await;
        guard.disarm();
        joined.map_err(|e| ManagerError::Execution(e.to_string()))
    }

    /// Manual run with an optional payload.
    pub async fn run(
        &self,
        id: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult, ManagerError> {
        self.execute(
            ExecutionRequest::new(id, TriggerOrigin::Manual, payload),
            timeout,
        )
        .await
    }

    /// Serves a trigger-originated request in the background.
    pub fn dispatch(self: &Arc<Self>, request: ExecutionRequest) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let spec_id = request.spec_id.clone();
            let origin = request.origin;
            if let Err(e) = manager.execute(request, None).await {
                warn!(
                    "Dropped {} trigger for '{}': {}",
                    origin.as_str(),
                    spec_id,
                    e
                );
            }
        })
    }

    /// Dispatches every request arriving on `rx` until `shutdown` fires.
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<ExecutionRequest>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    request = rx.recv() => match request {
                        Some(request) => {
                            manager.dispatch(request);
                        }
                        None => break,
                    },
                }
            }
            info!("Trigger dispatcher stopped");
        })
    }

    // --- Status ---

    pub async fn status(&self, id: &str) -> Result<AgentStatus, ManagerError> {
        let stored = self
            .store
            .get_spec(id)
            .await?
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))?;
        let history = self.orchestrator.history();
        let board = self.orchestrator.health();
        let health = self
            .orchestrator
            .registry()
            .ids()
            .into_iter()
            .map(|adapter| {
                let state = board.current(&adapter);
                (adapter, state)
            })
            .collect();
        let in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map_or(0, HashMap::len);

        Ok(AgentStatus {
            id: stored.spec.id.clone(),
            name: stored.spec.name.clone(),
            version: stored.version,
            active: stored.active,
            health,
            recent_attempts: history.recent_attempts(id, self.settings.recent_attempts),
            success_rate: history.success_rate(id, self.settings.success_window(), Utc::now()),
            adapter_stats: history.adapter_stats(id),
            in_flight,
        })
    }

    pub fn runtime_status(&self) -> Vec<RuntimeStatus> {
        let board = self.orchestrator.health();
        self.orchestrator
            .registry()
            .slots()
            .iter()
            .map(|slot| {
                let snapshot = board.snapshot(slot.id()).unwrap_or_default();
                RuntimeStatus {
                    id: slot.id().clone(),
                    health: snapshot.state,
                    capabilities: slot.adapter().capabilities().iter().copied().collect(),
                    last_probe: snapshot.last_probe,
                    pending: snapshot.pending,
                    capacity: slot.capacity(),
                    available: slot.available_permits(),
                }
            })
            .collect()
    }

    pub async fn force_health_check(&self) -> Vec<(BackendId, HealthState)> {
        self.monitor.force_probe_all().await
    }
}
