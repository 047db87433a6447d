//! Shared collaborators for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use sheetops::domain::{Arguments, DecisionSnapshot};
use sheetops::{EngineConfig, Executor, Orchestrator, Reasoner};

/// In-memory workbook. Reads report the sheet's write version so stale
/// cached reads are detectable.
#[derive(Default)]
pub struct SheetExecutor {
    calls: Mutex<Vec<(String, Arguments)>>,
    versions: Mutex<HashMap<String, u32>>,
    failing: AtomicBool,
}

impl SheetExecutor {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls_to(&self, tool: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == tool)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<(String, Arguments)> {
        self.calls.lock().unwrap().last().cloned()
    }
}

fn sheet_of(arguments: &Arguments) -> String {
    arguments
        .get("sheet")
        .and_then(|v| v.as_str())
        .unwrap_or("@active")
        .to_lowercase()
}

#[async_trait]
impl Executor for SheetExecutor {
    fn name(&self) -> &str {
        "sheet"
    }

    async fn execute(&self, tool_name: &str, arguments: &Arguments) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), arguments.clone()));

        let forced = arguments.get("fail") == Some(&json!(true));
        if forced || self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("workbook unavailable");
        }

        let sheet = sheet_of(arguments);
        let mut versions = self.versions.lock().unwrap();
        match tool_name {
            "write_range" | "clear_range" => {
                *versions.entry(sheet).or_insert(0) += 1;
                Ok("written".to_string())
            }
            "read_range" => {
                let version = versions.get(&sheet).copied().unwrap_or(0);
                Ok(format!("{}@v{}", sheet, version))
            }
            other => Ok(format!("{}-ok", other)),
        }
    }
}

/// Reasoner that answers with a fixed reply, or echoes the request when
/// no reply is set. Echoing lets tests submit raw decision JSON.
#[derive(Default)]
pub struct ScriptedReasoner {
    calls: AtomicUsize,
    reply: Mutex<Option<String>>,
}

impl ScriptedReasoner {
    pub fn replying(reply: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reply: Mutex::new(Some(reply.to_string())),
        }
    }

    pub fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = Some(reply.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, request: &str, _snapshot: &DecisionSnapshot) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .reply
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| request.to_string()))
    }
}

/// Config with background timers pushed out of the way of a test run
pub fn test_config() -> EngineConfig {
    EngineConfig {
        mode_tick_seconds: 3600,
        sweep_interval_seconds: 3600,
        ..Default::default()
    }
}

pub struct Harness {
    pub engine: Orchestrator,
    pub executor: Arc<SheetExecutor>,
    pub reasoner: Arc<ScriptedReasoner>,
}

/// Build and start an engine around the in-memory collaborators
pub fn start(config: EngineConfig, reasoner: ScriptedReasoner) -> Harness {
    let executor = Arc::new(SheetExecutor::default());
    let reasoner = Arc::new(reasoner);
    let engine = Orchestrator::new(config, executor.clone(), reasoner.clone());
    engine.start();
    Harness {
        engine,
        executor,
        reasoner,
    }
}

/// Decision JSON for a single tool call
pub fn call(tool: &str, args: serde_json::Value) -> String {
    json!({ "tool": tool, "args": args }).to_string()
}
