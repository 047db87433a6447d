//! HTTP executor for a spreadsheet automation service.
//!
//! Endpoint: POST {url}/tools/{tool_name}
//! Body: {"arguments": {...}}
//! Auth: optional Bearer token

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ExecutorConfig;
use crate::domain::Arguments;

use super::Executor;

/// Executor that forwards tool calls to an HTTP service
pub struct HttpExecutor {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ToolRequest<'a> {
    arguments: &'a Arguments,
}

/// Response body from the automation service
#[derive(Debug, Deserialize)]
struct ToolResponse {
    #[serde(default = "default_ok")]
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

fn default_ok() -> bool {
    true
}

impl HttpExecutor {
    /// Create a client. The request timeout bounds every executor call.
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }

    fn endpoint(&self, tool_name: &str) -> String {
        format!("{}/tools/{}", self.base_url, tool_name)
    }
}

/// Turn a response body into a payload or an error
fn interpret(tool_name: &str, body: &str) -> Result<String> {
    let parsed: ToolResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        // Plain-text services return the payload directly
        Err(_) => return Ok(body.to_string()),
    };

    if !parsed.ok {
        anyhow::bail!(
            "{}: {}",
            tool_name,
            parsed.error.unwrap_or_else(|| "executor reported failure".to_string())
        );
    }

    Ok(match parsed.result {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[async_trait]
impl Executor for HttpExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, tool_name: &str, arguments: &Arguments) -> Result<String> {
        let mut request = self
            .client
            .post(self.endpoint(tool_name))
            .header("Content-Type", "application/json")
            .json(&ToolRequest { arguments });

        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to call executor for '{}'", tool_name))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            anyhow::bail!("Executor error ({}): {}", status, text.trim());
        }

        interpret(tool_name, &text)
    }
}
