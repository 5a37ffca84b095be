use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Identifier of an execution backend, e.g. `local`, `n8n`, `docker`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    pub const LOCAL: &'static str = "local";
    pub const WORKFLOW: &'static str = "n8n";
    pub const DOCKER: &'static str = "docker";
    pub const KUBERNETES: &'static str = "kubernetes";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn local() -> Self {
        Self::new(Self::LOCAL)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

fn default_runtime_preferences() -> Vec<BackendId> {
    vec![BackendId::local(), BackendId::new(BackendId::WORKFLOW)]
}

/// Declarative, backend-neutral description of an agent.
///
/// Documents are replaced whole on update and never mutated in place. Fields this
/// version does not know about are kept in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AgentSpecification {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default = "default_runtime_preferences")]
    pub runtime_preferences: Vec<BackendId>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub sla: Sla,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentSpecification {
    pub fn new(id: impl Into<String>, name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner: owner.into(),
            triggers: Vec::new(),
            steps: Vec::new(),
            runtime_preferences: default_runtime_preferences(),
            metadata: Metadata::default(),
            sla: Sla::default(),
            secrets: BTreeMap::new(),
            environment: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Every step kind an adapter must support to run this specification.
    pub fn required_kinds(&self) -> BTreeSet<StepKind> {
        self.steps.iter().map(|s| s.action.kind()).collect()
    }

    /// First step whose kind is missing from `capabilities`, in declaration order.
    pub fn first_unsupported(&self, capabilities: &BTreeSet<StepKind>) -> Option<&Step> {
        self.steps
            .iter()
            .find(|s| !capabilities.contains(&s.action.kind()))
    }

    /// SHA-256 over the canonical JSON encoding, hex encoded.
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }
}

fn default_spec_version() -> String {
    "1.0.0".to_string()
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default = "default_spec_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            created_at: None,
            created_by: None,
            version: default_spec_version(),
            tags: Vec::new(),
            description: None,
            documentation_url: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

fn default_max_execution_time() -> u64 {
    300
}

fn default_max_memory_mb() -> u32 {
    512
}

fn default_max_cpu_percent() -> u8 {
    80
}

/// Resource and time envelope for a single execution attempt.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Sla {
    /// Seconds.
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time: u64,
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u32,
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: u8,
    #[serde(default)]
    pub priority: Priority,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Sla {
    pub fn execution_deadline(&self) -> Duration {
        Duration::from_secs(self.max_execution_time)
    }
}

impl Default for Sla {
    fn default() -> Self {
        Self {
            max_execution_time: default_max_execution_time(),
            max_memory_mb: default_max_memory_mb(),
            max_cpu_percent: default_max_cpu_percent(),
            priority: Priority::Normal,
            extra: Map::new(),
        }
    }
}

/// A tagged object plus whatever keys its known variant does not declare.
///
/// Undeclared keys live in `extra` and are written back after the variant's own.
#[derive(Debug, Clone, PartialEq)]
pub struct Extensible<T> {
    pub inner: T,
    pub extra: Map<String, Value>,
}

impl<T> Extensible<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            extra: Map::new(),
        }
    }
}

impl<T> Deref for Extensible<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for Extensible<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> From<T> for Extensible<T> {
    fn from(inner: T) -> Self {
        Self::new(inner)
    }
}

impl<T: serde::Serialize> serde::Serialize for Extensible<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error;

        let mut object = match serde_json::to_value(&self.inner).map_err(S::Error::custom)? {
            Value::Object(object) => object,
            other => return serde::Serialize::serialize(&other, serializer),
        };
        for (key, value) in &self.extra {
            if !object.contains_key(key) {
                object.insert(key.clone(), value.clone());
            }
        }
        serde::Serialize::serialize(&object, serializer)
    }
}

impl<'de, T: serde::de::DeserializeOwned + serde::Serialize> serde::Deserialize<'de>
    for Extensible<T>
{
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let mut raw = <Map<String, Value> as serde::Deserialize>::deserialize(deserializer)?;
        let inner: T =
            serde_json::from_value(Value::Object(raw.clone())).map_err(D::Error::custom)?;
        // Keys the variant wrote itself are its own; the rest are carried along.
        if let Ok(Value::Object(known)) = serde_json::to_value(&inner) {
            raw.retain(|key, _| !known.contains_key(key));
        }
        Ok(Self { inner, extra: raw })
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Trigger {
    pub kind: Extensible<TriggerKind>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Trigger {
    pub fn new(kind: TriggerKind) -> Self {
        Self {
            kind: Extensible::new(kind),
            enabled: true,
            extra: Map::new(),
        }
    }

    pub fn schedule(cron_expression: impl Into<String>) -> Self {
        Self::new(TriggerKind::Schedule {
            cron_expression: cron_expression.into(),
            timezone: None,
        })
    }

    pub fn webhook(path: impl Into<String>) -> Self {
        Self::new(TriggerKind::Webhook {
            path: path.into(),
            secret: None,
        })
    }
}

fn default_poll_interval() -> u64 {
    3600
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    Schedule {
        cron_expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    Webhook {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
    },
    FeedPoll {
        source_url: String,
        #[serde(default = "default_poll_interval")]
        poll_interval_secs: u64,
    },
    FileWatch {
        path: String,
    },
    QueueMessage {
        queue_name: String,
    },
    Manual,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Schedule { .. } => "schedule",
            TriggerKind::Webhook { .. } => "webhook",
            TriggerKind::FeedPoll { .. } => "feed_poll",
            TriggerKind::FileWatch { .. } => "file_watch",
            TriggerKind::QueueMessage { .. } => "queue_message",
            TriggerKind::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    #[default]
    Fail,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

fn default_max_attempts() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffKind,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffKind::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub action: Extensible<StepAction>,
    /// Executor-specific settings (url, model, channel, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
    /// References of the form `step:<step_id>:<output_key>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Step {
    pub fn new(id: impl Into<String>, action: StepAction) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            action: Extensible::new(action),
            config: Map::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            on_error: OnError::default(),
            retry: RetryPolicy::default(),
            condition: None,
            extra: Map::new(),
        }
    }

    pub fn with_config(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    pub fn with_input(mut self, reference: impl Into<String>) -> Self {
        self.inputs.push(reference.into());
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// Splits a `step:<step_id>:<output_key>` reference.
pub fn parse_input_ref(reference: &str) -> Option<(&str, &str)> {
    let rest = reference.strip_prefix("step:")?;
    let (step_id, key) = rest.split_once(':')?;
    if step_id.is_empty() || key.is_empty() {
        return None;
    }
    Some((step_id, key))
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    HttpRequest,
    ParseFeed,
    GenerateContent,
    SendMessage,
    TransformData,
    FilterData,
    Conditional {
        predicate: String,
        #[serde(default)]
        then_branch: Vec<String>,
        #[serde(default)]
        else_branch: Vec<String>,
    },
    Loop {
        condition: String,
        body: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_iterations: Option<u32>,
    },
    Delay {
        duration_secs: u64,
    },
    CustomCode {
        reference: String,
    },
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            StepAction::HttpRequest => StepKind::HttpRequest,
            StepAction::ParseFeed => StepKind::ParseFeed,
            StepAction::GenerateContent => StepKind::GenerateContent,
            StepAction::SendMessage => StepKind::SendMessage,
            StepAction::TransformData => StepKind::TransformData,
            StepAction::FilterData => StepKind::FilterData,
            StepAction::Conditional { .. } => StepKind::Conditional,
            StepAction::Loop { .. } => StepKind::Loop,
            StepAction::Delay { .. } => StepKind::Delay,
            StepAction::CustomCode { .. } => StepKind::CustomCode,
        }
    }

    /// Step ids this action hands control to.
    pub fn branch_targets(&self) -> Vec<&str> {
        match self {
            StepAction::Conditional {
                then_branch,
                else_branch,
                ..
            } => then_branch
                .iter()
                .chain(else_branch.iter())
                .map(String::as_str)
                .collect(),
            StepAction::Loop { body, .. } => body.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// A capability: one kind of step an adapter can run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    HttpRequest,
    ParseFeed,
    GenerateContent,
    SendMessage,
    TransformData,
    FilterData,
    Conditional,
    Loop,
    Delay,
    CustomCode,
}

impl StepKind {
    pub const ALL: [StepKind; 10] = [
        StepKind::HttpRequest,
        StepKind::ParseFeed,
        StepKind::GenerateContent,
        StepKind::SendMessage,
        StepKind::TransformData,
        StepKind::FilterData,
        StepKind::Conditional,
        StepKind::Loop,
        StepKind::Delay,
        StepKind::CustomCode,
    ];

    pub fn all() -> BTreeSet<StepKind> {
        Self::ALL.into_iter().collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::HttpRequest => "http_request",
            StepKind::ParseFeed => "parse_feed",
            StepKind::GenerateContent => "generate_content",
            StepKind::SendMessage => "send_message",
            StepKind::TransformData => "transform_data",
            StepKind::FilterData => "filter_data",
            StepKind::Conditional => "conditional",
            StepKind::Loop => "loop",
            StepKind::Delay => "delay",
            StepKind::CustomCode => "custom_code",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }

    /// Control steps are interpreted by the engine rather than a step executor.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            StepKind::Conditional | StepKind::Loop | StepKind::Delay
        )
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
