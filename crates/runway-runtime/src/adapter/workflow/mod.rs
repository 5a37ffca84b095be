//! Adapter for an n8n-style workflow-automation service reached over HTTP.

mod translate;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use runway_types::{
    AgentSpecification, BackendId, ExecutionAdapter, ExecutionContext, ExecutionHandle,
    HealthState, RunStatus, StepKind, SubmitError, ensure_supported,
};
use serde_json::{Value, json};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::settings::WorkflowSettings;

pub use translate::to_workflow;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const SLOW_PROBE: Duration = Duration::from_secs(2);
const API_KEY_HEADER: &str = "X-N8N-API-KEY";

#[derive(Debug, thiserror::Error)]
pub enum WorkflowConfigError {
    #[error("workflow adapter needs an api_url")]
    MissingUrl,
    #[error("invalid api_url '{0}'")]
    InvalidUrl(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Clone)]
enum Auth {
    Anonymous,
    Basic {
        username: String,
        password: Option<String>,
    },
    ApiKey(String),
}

pub struct WorkflowAdapter {
    id: BackendId,
    capabilities: BTreeSet<StepKind>,
    client: Client,
    base: String,
    auth: Auth,
    /// Content hash -> deployed workflow id. Each hash deploys at most once at a time.
    deployed: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl WorkflowAdapter {
    pub fn new(settings: &WorkflowSettings) -> Result<Self, WorkflowConfigError> {
        let raw = settings
            .api_url
            .as_deref()
            .ok_or(WorkflowConfigError::MissingUrl)?;
        let parsed =
            url::Url::parse(raw).map_err(|_| WorkflowConfigError::InvalidUrl(raw.to_string()))?;
        let auth = match (&settings.api_key, &settings.username) {
            (Some(key), _) => Auth::ApiKey(key.clone()),
            (None, Some(username)) => Auth::Basic {
                username: username.clone(),
                password: settings.password.clone(),
            },
            (None, None) => Auth::Anonymous,
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()?;

        let mut capabilities = StepKind::all();
        capabilities.remove(&StepKind::GenerateContent);
        capabilities.remove(&StepKind::Loop);

        Ok(Self {
            id: BackendId::new(BackendId::WORKFLOW),
            capabilities,
            client,
            base: parsed.as_str().trim_end_matches('/').to_string(),
            auth,
            deployed: Mutex::new(HashMap::new()),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base, path));
        match &self.auth {
            Auth::Anonymous => builder,
            Auth::Basic { username, password } => builder.basic_auth(username, password.as_ref()),
            Auth::ApiKey(key) => builder.header(API_KEY_HEADER, key),
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value, SubmitError> {
        let response = builder.send().await.map_err(|e| classify_transport(&e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| classify_transport(&e))?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| SubmitError::Rejected(format!("unreadable response: {e}")))
    }

    /// Returns the workflow id for `spec`, deploying it when this content hash is new.
    async fn ensure_deployed(&self, spec: &AgentSpecification) -> Result<String, SubmitError> {
        let hash = spec.content_hash();
        let cell = self
            .deployed
            .lock()
            .await
            .entry(hash.clone())
            .or_default()
            .clone();
        let workflow_id = cell
            .get_or_try_init(|| async {
                let document = to_workflow(spec);
                let created = self
                    .send(self.request(reqwest::Method::POST, "/workflows").json(&document))
                    .await?;
                let workflow_id = extract_id(&created, &["id"]).ok_or_else(|| {
                    SubmitError::Rejected("workflow service returned no workflow id".into())
                })?;
                info!(
                    "Deployed workflow {} for '{}' ({})",
                    workflow_id,
                    spec.id,
                    &hash[..12.min(hash.len())]
                );
                Ok::<_, SubmitError>(workflow_id)
            })
            .await?;
        Ok(workflow_id.clone())
    }

    async fn forget(&self, spec: &AgentSpecification) {
        self.deployed.lock().await.remove(&spec.content_hash());
    }

    /// Number of workflows deployed through this adapter.
    pub async fn deployed_count(&self) -> usize {
        self.deployed
            .lock()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }
}

fn extract_id(body: &Value, keys: &[&str]) -> Option<String> {
    let scopes = [Some(body), body.get("data")];
    scopes.into_iter().flatten().find_map(|scope| {
        keys.iter().find_map(|k| match scope.get(*k)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    })
}

fn classify_status(status: StatusCode, body: &str) -> SubmitError {
    let detail = format!("{} {}", status.as_u16(), body.chars().take(200).collect::<String>());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SubmitError::Unavailable(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SubmitError::Transient(detail)
        }
        s if s.is_server_error() => SubmitError::Transient(detail),
        _ => SubmitError::Rejected(detail),
    }
}

fn classify_transport(err: &reqwest::Error) -> SubmitError {
    if err.is_connect() {
        SubmitError::Unavailable(err.to_string())
    } else {
        SubmitError::Transient(err.to_string())
    }
}

fn run_status(body: &Value) -> RunStatus {
    let scope = body.get("data").filter(|d| d.get("status").is_some()).unwrap_or(body);
    let status = scope.get("status").and_then(Value::as_str).unwrap_or("");
    match status {
        "success" => RunStatus::Succeeded {
            output: scope
                .get("data")
                .cloned()
                .unwrap_or(Value::Null),
        },
        "error" | "crashed" => RunStatus::Failed {
            reason: scope
                .pointer("/data/resultData/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("workflow execution {status}")),
        },
        "canceled" | "cancelled" => RunStatus::Failed {
            reason: "cancelled".into(),
        },
        _ if scope.get("finished").and_then(Value::as_bool) == Some(true) => {
            RunStatus::Succeeded {
                output: scope.get("data").cloned().unwrap_or(Value::Null),
            }
        }
        _ => RunStatus::Running,
    }
}

#[async_trait]
impl ExecutionAdapter for WorkflowAdapter {
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
        ensure_supported(&spec, &self.capabilities)?;
        let workflow_id = self.ensure_deployed(&spec).await?;
        let body = json!({
            "data": ctx.payload,
            "runway": {
                "execution_id": ctx.execution_id,
                "request_id": ctx.request_id,
                "origin": ctx.origin.as_str(),
            },
        });
        let started = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/workflows/{workflow_id}/execute"),
                )
                .json(&body),
            )
            .await;
        let started = match started {
            Err(SubmitError::Rejected(msg)) if msg.starts_with("404") => {
                warn!("Workflow {} vanished; it will be redeployed", workflow_id);
                self.forget(&spec).await;
                return Err(SubmitError::Transient(msg));
            }
            other => other?,
        };
        let execution = extract_id(&started, &["executionId", "id"]).ok_or_else(|| {
            SubmitError::Rejected("workflow service returned no execution id".into())
        })?;
        debug!(
            "Workflow {} started execution {} for '{}'",
            workflow_id, execution, spec.id
        );
        Ok(ExecutionHandle::new(ctx.execution_id, execution))
    }

    async fn poll(&self, handle: &ExecutionHandle) -> Result<RunStatus, SubmitError> {
        let body = self
            .send(self.request(
                reqwest::Method::GET,
                &format!("/executions/{}", handle.backend_ref),
            ))
            .await?;
        Ok(run_status(&body))
    }

    async fn cancel(&self, handle: &ExecutionHandle) -> Result<(), SubmitError> {
        self.send(self.request(
            reqwest::Method::POST,
            &format!("/executions/{}/stop", handle.backend_ref),
        ))
        .await
        .map(|_| ())
    }

    async fn probe_health(&self) -> HealthState {
        let started = Instant::now();
        let response = self
            .request(reqwest::Method::GET, "/workflows")
            .query(&[("limit", "1")])
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match response {
            Err(e) => {
                debug!("Workflow probe failed: {}", e);
                HealthState::Unavailable
            }
            Ok(r) => match r.status() {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HealthState::Unavailable,
                s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                    HealthState::Degraded
                }
                s if s.is_success() && started.elapsed() <= SLOW_PROBE => HealthState::Healthy,
                _ => HealthState::Degraded,
            },
        }
    }
}

#[cfg(test)]
mod tests;
