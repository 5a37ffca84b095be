use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::StepError;
use crate::spec::{Step, StepKind, parse_input_ref};

/// Data visible to a step while it runs.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub spec_id: String,
    pub execution_id: Uuid,
    pub trigger_payload: Value,
    /// Outputs of already finished steps, keyed by step id.
    pub outputs: Map<String, Value>,
    pub environment: BTreeMap<String, String>,
}

impl StepContext {
    /// Resolves a `step:<id>:<key>` reference against prior outputs.
    pub fn resolve(&self, reference: &str) -> Option<&Value> {
        let (step_id, key) = parse_input_ref(reference)?;
        self.outputs.get(step_id)?.get(key)
    }

    /// Looks up `key` in the step's config, falling back to the step's first resolvable input.
    pub fn input_value<'a>(&'a self, step: &'a Step, key: &str) -> Option<&'a Value> {
        if let Some(value) = step.config.get(key) {
            return Some(value);
        }
        step.inputs.iter().find_map(|r| self.resolve(r))
    }
}

/// Directly linked step implementation used by the in-process engine.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn kind(&self) -> StepKind;

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<Value, StepError>;
}
