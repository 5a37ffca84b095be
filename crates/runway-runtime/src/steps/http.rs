use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use runway_types::{Step, StepContext, StepError, StepExecutor, StepKind};
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// `http_request`: config `url`, `method`, `headers`, `body`, `timeout_secs`.
pub struct HttpRequestStep {
    client: reqwest::Client,
}

impl HttpRequestStep {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepExecutor for HttpRequestStep {
    fn kind(&self) -> StepKind {
        StepKind::HttpRequest
    }

    async fn execute(&self, step: &Step, ctx: &StepContext) -> Result<Value, StepError> {
        let url = ctx
            .input_value(step, "url")
            .and_then(Value::as_str)
            .ok_or_else(|| StepError::MissingInput("url".into()))?;
        let method = step.config_str("method").unwrap_or("GET").to_uppercase();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| StepError::Config(format!("unknown HTTP method '{method}'")))?;
        let timeout = step
            .config
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(Duration::from_secs(timeout));
        if let Some(Value::Object(headers)) = step.config.get("headers") {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }
        match step.config.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(raw)) => request = request.body(raw.clone()),
            Some(other) => request = request.json(other),
        }

        debug!("{} {} for step '{}'", method, url, step.id);
        let response = request
            .send()
            .await
            .map_err(|e| StepError::Failed(format!("request to {url} failed: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StepError::Failed(format!("reading response from {url}: {e}")))?;
        if !status.is_success() {
            return Err(StepError::Failed(format!("{url} answered {status}")));
        }
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(json!({
            "status": status.as_u16(),
            "body": body,
        }))
    }
}
