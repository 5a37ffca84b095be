//! `runway.toml`: gateway address, runtime tunables and adapter backends.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use runway_runtime::{
    DockerSettings, HealthSettings, KubernetesSettings, LocalSettings, ManagerSettings,
    OrchestratorSettings, WorkflowSettings,
};
use serde::{Deserialize, Serialize};

use crate::platform::{NativePlatform, Platform};

pub const CONFIG_FILE: &str = "runway.toml";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 17990;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token required on management routes. Mandatory off loopback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_token: None,
        }
    }
}

impl GatewaySettings {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunwayConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub local: LocalSettings,
    #[serde(default)]
    pub workflow: WorkflowSettings,
    #[serde(default)]
    pub docker: DockerSettings,
    #[serde(default)]
    pub kubernetes: KubernetesSettings,
    #[serde(default)]
    pub manager: ManagerSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Resolved at load time, never read from the file.
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Default for RunwayConfig {
    fn default() -> Self {
        Self {
            gateway: GatewaySettings::default(),
            orchestrator: OrchestratorSettings::default(),
            health: HealthSettings::default(),
            local: LocalSettings::default(),
            workflow: WorkflowSettings::default(),
            docker: DockerSettings::default(),
            kubernetes: KubernetesSettings::default(),
            manager: ManagerSettings::default(),
            log_level: default_log_level(),
            data_dir: PathBuf::new(),
        }
    }
}

impl RunwayConfig {
    /// Loads `<data_dir>/runway.toml` and applies the process environment.
    pub fn load() -> Result<Self> {
        let data_dir = NativePlatform::data_dir();
        let mut config = Self::load_from(&data_dir.join(CONFIG_FILE))?;
        config.data_dir = data_dir;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config at {}", path.display()))
    }

    /// Environment variables take precedence over the file.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("N8N_API_URL") {
            self.workflow.api_url = Some(url);
        }
        if let Some(user) = non_empty("N8N_USER") {
            self.workflow.username = Some(user);
        }
        if let Some(password) = non_empty("N8N_PASSWORD") {
            self.workflow.password = Some(password);
        }
        if let Some(key) = non_empty("N8N_API_KEY") {
            self.workflow.api_key = Some(key);
        }
        if let Some(flag) = non_empty("RUNWAY_DOCKER_ENABLED") {
            self.docker.enabled = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(token) = non_empty("RUNWAY_API_TOKEN") {
            self.gateway.api_token = Some(token);
        }
        if let Some(level) = non_empty("RUNWAY_LOG") {
            self.log_level = level;
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("runway.db")
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }
}
