//! Test doubles and fixtures shared across runway crates.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use runway_types::{
    AgentSpecification, BackendId, ExecutionAdapter, ExecutionContext, ExecutionHandle,
    HealthState, RunStatus, Step, StepAction, StepKind, SubmitError, Trigger, ensure_supported,
};
use serde_json::{Value, json};
use tokio::time::Instant;

/// What a scripted backend does with one submission.
#[derive(Debug, Clone)]
pub enum Behavior {
    SucceedAfter(Duration, Value),
    FailAfter(Duration, String),
    Refuse(SubmitError),
    /// Stays `Running` until cancelled.
    Hang,
}

impl Behavior {
    pub fn succeed() -> Self {
        Behavior::SucceedAfter(Duration::ZERO, json!({"ok": true}))
    }

    pub fn unavailable() -> Self {
        Behavior::Refuse(SubmitError::Unavailable("connection refused".into()))
    }

    pub fn transient() -> Self {
        Behavior::Refuse(SubmitError::Transient("503 service unavailable".into()))
    }
}

struct Run {
    behavior: Behavior,
    submitted: Instant,
    cancelled: bool,
}

/// Adapter whose submissions follow a queue of scripted behaviours.
pub struct ScriptedAdapter {
    id: BackendId,
    capabilities: BTreeSet<StepKind>,
    script: Mutex<VecDeque<Behavior>>,
    fallback: Behavior,
    health: Mutex<VecDeque<HealthState>>,
    steady_health: Mutex<HealthState>,
    runs: Mutex<HashMap<String, Run>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
    cancels: Mutex<Vec<ExecutionHandle>>,
    probes: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(id: &str) -> Self {
        Self {
            id: BackendId::new(id),
            capabilities: StepKind::all(),
            script: Mutex::new(VecDeque::new()),
            fallback: Behavior::succeed(),
            health: Mutex::new(VecDeque::new()),
            steady_health: Mutex::new(HealthState::Healthy),
            runs: Mutex::new(HashMap::new()),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            cancels: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, kinds: impl IntoIterator<Item = StepKind>) -> Self {
        self.capabilities = kinds.into_iter().collect();
        self
    }

    /// Behaviour for every submission once the queued ones are used up.
    pub fn always(mut self, behavior: Behavior) -> Self {
        self.fallback = behavior;
        self
    }

    pub fn then(self, behavior: Behavior) -> Self {
        self.script.lock().unwrap().push_back(behavior);
        self
    }

    /// Probe results returned in order; the last one repeats.
    pub fn with_probes(self, states: impl IntoIterator<Item = HealthState>) -> Self {
        self.health.lock().unwrap().extend(states);
        self
    }

    pub fn set_health(&self, state: HealthState) {
        self.health.lock().unwrap().clear();
        *self.steady_health.lock().unwrap() = state;
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.lock().unwrap().len()
    }

    pub fn cancelled(&self) -> Vec<ExecutionHandle> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionAdapter for ScriptedAdapter {
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
        self.submits.fetch_add(1, Ordering::SeqCst);
        ensure_supported(&spec, &self.capabilities)?;
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if let Behavior::Refuse(err) = behavior {
            return Err(err);
        }
        let handle = ExecutionHandle::new(ctx.execution_id, format!("{}-{}", self.id, ctx.ordinal));
        self.runs.lock().unwrap().insert(
            handle.backend_ref.clone(),
            Run {
                behavior,
                submitted: Instant::now(),
                cancelled: false,
            },
        );
        Ok(handle)
    }

    async fn poll(&self, handle: &ExecutionHandle) -> Result<RunStatus, SubmitError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let runs = self.runs.lock().unwrap();
        let Some(run) = runs.get(&handle.backend_ref) else {
            return Err(SubmitError::Rejected(format!("unknown handle {}", handle.backend_ref)));
        };
        if run.cancelled {
            return Ok(RunStatus::Failed {
                reason: "cancelled".into(),
            });
        }
        let elapsed = run.submitted.elapsed();
        Ok(match &run.behavior {
            Behavior::SucceedAfter(after, output) if elapsed >= *after => RunStatus::Succeeded {
                output: output.clone(),
            },
            Behavior::FailAfter(after, reason) if elapsed >= *after => RunStatus::Failed {
                reason: reason.clone(),
            },
            _ => RunStatus::Running,
        })
    }

    async fn cancel(&self, handle: &ExecutionHandle) -> Result<(), SubmitError> {
        if let Some(run) = self.runs.lock().unwrap().get_mut(&handle.backend_ref) {
            run.cancelled = true;
        }
        self.cancels.lock().unwrap().push(handle.clone());
        Ok(())
    }

    async fn probe_health(&self) -> HealthState {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let mut queued = self.health.lock().unwrap();
        match queued.pop_front() {
            Some(state) => {
                if queued.is_empty() {
                    *self.steady_health.lock().unwrap() = state;
                }
                state
            }
            None => *self.steady_health.lock().unwrap(),
        }
    }
}

/// A minimal valid specification with one HTTP step.
pub fn simple_spec(id: &str) -> AgentSpecification {
    let mut spec = AgentSpecification::new(id, format!("agent {id}"), "ops");
    spec.steps.push(
        Step::new("fetch", StepAction::HttpRequest).with_config("url", "https://example.com"),
    );
    spec.triggers.push(Trigger::new(runway_types::TriggerKind::Manual));
    spec
}

/// `simple_spec` with explicit backend preferences.
pub fn spec_preferring(id: &str, preferences: &[&str]) -> AgentSpecification {
    let mut spec = simple_spec(id);
    spec.runtime_preferences = preferences.iter().map(|p| BackendId::new(*p)).collect();
    spec
}

/// One step per kind, in the order given. Control kinds get empty branches.
pub fn spec_with_kinds(id: &str, kinds: &[StepKind]) -> AgentSpecification {
    let mut spec = AgentSpecification::new(id, format!("agent {id}"), "ops");
    for (i, kind) in kinds.iter().enumerate() {
        spec.steps
            .push(Step::new(format!("s{i}"), action_for(*kind)));
    }
    spec
}

pub fn action_for(kind: StepKind) -> StepAction {
    match kind {
        StepKind::HttpRequest => StepAction::HttpRequest,
        StepKind::ParseFeed => StepAction::ParseFeed,
        StepKind::GenerateContent => StepAction::GenerateContent,
        StepKind::SendMessage => StepAction::SendMessage,
        StepKind::TransformData => StepAction::TransformData,
        StepKind::FilterData => StepAction::FilterData,
        StepKind::Conditional => StepAction::Conditional {
            predicate: "true".into(),
            then_branch: Vec::new(),
            else_branch: Vec::new(),
        },
        StepKind::Loop => StepAction::Loop {
            condition: "false".into(),
            body: Vec::new(),
            max_iterations: Some(1),
        },
        StepKind::Delay => StepAction::Delay { duration_secs: 0 },
        StepKind::CustomCode => StepAction::CustomCode {
            reference: "hooks/noop".into(),
        },
    }
}

fn arb_plain_action() -> impl Strategy<Value = StepAction> {
    prop_oneof![
        Just(StepAction::HttpRequest),
        Just(StepAction::ParseFeed),
        Just(StepAction::GenerateContent),
        Just(StepAction::SendMessage),
        Just(StepAction::TransformData),
        Just(StepAction::FilterData),
        (0u64..30).prop_map(|duration_secs| StepAction::Delay { duration_secs }),
    ]
}

/// Specifications that satisfy every validation rule.
pub fn arb_valid_spec() -> impl Strategy<Value = AgentSpecification> {
    (
        "[a-z][a-z0-9-]{0,15}",
        "[A-Za-z][A-Za-z ]{0,20}",
        prop::collection::vec(arb_plain_action(), 1..8),
        prop::sample::subsequence(vec!["local", "n8n", "docker", "kubernetes"], 0..4),
    )
        .prop_map(|(id, name, actions, prefs)| {
            let mut spec = AgentSpecification::new(id, name, "ops");
            for (i, action) in actions.into_iter().enumerate() {
                spec.steps.push(Step::new(format!("step-{i}"), action));
            }
            spec.runtime_preferences = prefs.into_iter().map(BackendId::new).collect();
            spec
        })
}
