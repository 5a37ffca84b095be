use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use serde_json::Value;

use crate::core::terminal::{print_error, print_success};

/// Thin client for the gateway's management API.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

/// Status plus the `{"success": .., "error": ..}` envelope every route answers with.
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    pub fn succeeded(&self) -> bool {
        self.body.get("success").and_then(|v| v.as_bool()) == Some(true)
    }

    pub fn error(&self) -> String {
        let message = self
            .body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown error");
        match self.body.get("field").and_then(|v| v.as_str()) {
            Some(field) => format!("{message} (field: {field})"),
            None => format!("{message} (HTTP {})", self.status.as_u16()),
        }
    }

    /// Prints the success line or the gateway's error; returns whether it succeeded.
    pub fn report(&self, success: &str) -> bool {
        if self.succeeded() {
            print_success(success);
            true
        } else {
            print_error(&format!("Error: {}", self.error()));
            false
        }
    }
}

impl GatewayClient {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(&self, path: &str) -> Result<Reply> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Option<&Value>) -> Result<Reply> {
        self.send(Method::POST, path, body).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Reply> {
        self.send(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Reply> {
        self.send(Method::DELETE, path, None).await
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Reply> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.with_context(|| {
            format!(
                "Could not reach the gateway at {}. Is it running? Try 'runway gateway start'",
                self.base_url
            )
        })?;
        let status = response.status();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(Reply { status, body })
    }
}
