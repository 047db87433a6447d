//! Fabric reasoner for requests no fast-path layer resolved.
//!
//! Spawns `fabric -p <pattern>` and pipes a prompt built from the request
//! and the decision snapshot to stdin. The pattern is expected to answer
//! with tool-call JSON or plain prose.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ReasonerConfig;
use crate::domain::DecisionSnapshot;

use super::Reasoner;

/// Reasoner backed by the fabric CLI
pub struct FabricReasoner {
    /// Path to the fabric binary
    binary_path: String,

    /// Pattern that turns a request into a decision
    pattern: String,

    timeout: Duration,
}

impl FabricReasoner {
    /// Build from config. Without an explicit binary, looks for fabric-ai
    /// first (Homebrew install), then falls back to fabric.
    pub fn new(config: &ReasonerConfig) -> Self {
        let binary_path = match &config.binary {
            Some(path) => path.display().to_string(),
            None => {
                if std::process::Command::new("fabric-ai")
                    .arg("--help")
                    .output()
                    .is_ok()
                {
                    "fabric-ai".to_string()
                } else {
                    "fabric".to_string()
                }
            }
        };

        Self {
            binary_path,
            pattern: config.pattern.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// Create a reasoner with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            pattern: pattern.into(),
            timeout: Duration::from_secs(60),
        }
    }

    async fn run_pattern(&self, input: &str) -> Result<String> {
        let mut child = Command::new(&self.binary_path)
            .args(["-p", &self.pattern])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!("Failed to spawn fabric process for pattern '{}'", self.pattern)
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .context("Failed to write to fabric stdin")?;
        }

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| {
                format!(
                    "Fabric pattern '{}' timed out after {:?}",
                    self.pattern, self.timeout
                )
            })?
            .with_context(|| format!("Failed to wait for fabric pattern '{}'", self.pattern))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "Fabric pattern '{}' failed with exit code {}: {}",
                self.pattern,
                exit_code,
                stderr.trim()
            );
        }

        String::from_utf8(output.stdout).context("Fabric output is not valid UTF-8")
    }
}

/// Render the prompt handed to the reasoning pattern
pub fn build_prompt(request: &str, snapshot: &DecisionSnapshot) -> Result<String> {
    let state = serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;

    Ok(format!(
        "REQUEST:\n{request}\n\n\
         ENGINE STATE:\n{state}\n\n\
         CONSTRAINTS:\n\
         - mode: {mode}\n\
         - use only these tools: {tools}\n\
         - at most {calls} tool call(s), at most {tokens} tokens\n\n\
         Reply with {{\"tool\": \"<name>\", \"args\": {{...}}}}, an array of such \
         objects, or a plain-text answer if no tool is needed.\n",
        request = request.trim(),
        state = state,
        mode = snapshot.mode,
        tools = snapshot.available_tools.join(", "),
        calls = snapshot.budget.max_tool_calls,
        tokens = snapshot.budget.max_tokens,
    ))
}

#[async_trait]
impl Reasoner for FabricReasoner {
    fn name(&self) -> &str {
        "fabric"
    }

    async fn decide(&self, request: &str, snapshot: &DecisionSnapshot) -> Result<String> {
        let prompt = build_prompt(request, snapshot)?;
        debug!(pattern = %self.pattern, bytes = prompt.len(), "Consulting fabric");
        let text = self.run_pattern(&prompt).await?;
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::{CacheStatus, HealthReport, OperationMode, Stats};

    fn snapshot() -> DecisionSnapshot {
        let mode = OperationMode::Degraded;
        DecisionSnapshot {
            timestamp: Utc::now(),
            mode,
            stats: Stats::default(),
            health: HealthReport {
                healthy: true,
                workers_active: 0,
                total_tasks: 0,
                tasks_pending: 0,
                last_check: Utc::now(),
                issues: Vec::new(),
            },
            cache: CacheStatus::default(),
            pending_tasks: 0,
            available_tools: vec!["read_range".to_string(), "write_range".to_string()],
            budget: mode.reasoning_budget(),
        }
    }

    #[test]
    fn test_custom_binary_path() {
        let reasoner = FabricReasoner::with_binary_path("/custom/path/fabric", "decide");
        assert_eq!(reasoner.binary_path, "/custom/path/fabric");
        assert_eq!(reasoner.pattern, "decide");
        assert_eq!(reasoner.name(), "fabric");
    }

    #[test]
    fn test_prompt_carries_constraints() {
        let prompt = build_prompt("  total column B  ", &snapshot()).unwrap();
        assert!(prompt.starts_with("REQUEST:\ntotal column B\n"));
        assert!(prompt.contains("- mode: degraded"));
        assert!(prompt.contains("read_range, write_range"));
        assert!(prompt.contains("at most 4 tool call(s)"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let reasoner =
            FabricReasoner::with_binary_path("/nonexistent/sheetops-fabric", "sheetops_decide");
        let err = reasoner.decide("hello", &snapshot()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to spawn fabric process"));
    }
}
