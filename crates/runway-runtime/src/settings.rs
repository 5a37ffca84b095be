//! Tunables for the runtime. The binary embeds these in its TOML config.

use std::time::Duration;

use runway_types::{ExecutionPolicy, InFlightUpdatePolicy};
use serde::{Deserialize, Serialize};

use crate::history::Retention;

fn default_attempt_deadline_cap_secs() -> u64 {
    3600
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_cap_ms() -> u64 {
    5_000
}

fn default_pool_permits() -> usize {
    4
}

fn default_call_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default)]
    pub policy: ExecutionPolicy,
    #[serde(default = "default_attempt_deadline_cap_secs")]
    pub attempt_deadline_cap_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Applied by `execute` when the caller gives no timeout. `None` waits for the policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_pool_permits")]
    pub pool_permits: usize,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            policy: ExecutionPolicy::default(),
            attempt_deadline_cap_secs: default_attempt_deadline_cap_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: None,
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            pool_permits: default_pool_permits(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl OrchestratorSettings {
    pub fn attempt_deadline_cap(&self) -> Duration {
        Duration::from_secs(self.attempt_deadline_cap_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_degraded_latency_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Probes slower than this report `Degraded` even when they succeed.
    #[serde(default = "default_degraded_latency_ms")]
    pub degraded_latency_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            degraded_latency_ms: default_degraded_latency_ms(),
        }
    }
}

impl HealthSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    pub fn degraded_latency(&self) -> Duration {
        Duration::from_millis(self.degraded_latency_ms)
    }
}

fn default_max_concurrent() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_workflow_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Base URL of the workflow API, e.g. `http://localhost:5678/api/v1`. Unset disables the adapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_workflow_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_runner_image() -> String {
    "ghcr.io/runway-dev/runner:latest".to_string()
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_kubectl_binary() -> String {
    "kubectl".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_runner_image")]
    pub image: String,
    #[serde(default = "default_docker_binary")]
    pub binary: String,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            image: default_runner_image(),
            binary: default_docker_binary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_runner_image")]
    pub image: String,
    #[serde(default = "default_kubectl_binary")]
    pub binary: String,
}

impl Default for KubernetesSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: default_namespace(),
            image: default_runner_image(),
            binary: default_kubectl_binary(),
        }
    }
}

fn default_success_window_hours() -> u64 {
    24
}

fn default_recent_attempts() -> usize {
    20
}

fn default_retained_attempts() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSettings {
    #[serde(default = "default_success_window_hours")]
    pub success_window_hours: u64,
    #[serde(default = "default_recent_attempts")]
    pub recent_attempts: usize,
    /// Attempts per agent kept in memory for status and per-adapter stats.
    #[serde(default = "default_retained_attempts")]
    pub retained_attempts: usize,
    #[serde(default)]
    pub in_flight_updates: InFlightUpdatePolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            success_window_hours: default_success_window_hours(),
            recent_attempts: default_recent_attempts(),
            retained_attempts: default_retained_attempts(),
            in_flight_updates: InFlightUpdatePolicy::default(),
        }
    }
}

impl ManagerSettings {
    pub fn success_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.success_window_hours as i64)
    }

    pub fn retention(&self) -> Retention {
        Retention {
            attempts: self.retained_attempts.max(self.recent_attempts),
            window: self.success_window(),
        }
    }
}
