//! Configuration for the sheetops engine.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SHEETOPS_HOME, SHEETOPS_EXECUTOR_URL)
//! 2. Config file (.sheetops/config.yaml)
//! 3. Defaults (~/.sheetops, local executor, `fabric` on PATH)
//!
//! Config file discovery:
//! - Searches current directory and parents for .sheetops/config.yaml
//! - A relative `home` in the config file is relative to the .sheetops/ directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::ledger::ReplayPolicy;
use crate::core::mode::ModeTable;
use crate::core::safety::SafetyGate;

pub const CONFIG_DIR: &str = ".sheetops";
pub const HOME_ENV: &str = "SHEETOPS_HOME";
pub const EXECUTOR_URL_ENV: &str = "SHEETOPS_EXECUTOR_URL";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,

    /// State directory (relative to the .sheetops/ directory)
    #[serde(default)]
    pub home: Option<String>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub reasoner: ReasonerConfig,
}

/// Engine tuning knobs. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-mode worker count and cache TTL
    #[serde(default)]
    pub modes: ModeTable,

    /// Destructive phrase list for the safety gate
    #[serde(default)]
    pub safety: SafetyGate,

    #[serde(default = "default_mode_tick_seconds")]
    pub mode_tick_seconds: u64,

    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    #[serde(default = "default_decision_ttl_seconds")]
    pub decision_ttl_seconds: u64,

    /// Consecutive failures before a signature is recurrent
    #[serde(default = "default_recurrence_threshold")]
    pub recurrence_threshold: u32,

    #[serde(default = "default_failure_ttl_seconds")]
    pub failure_ttl_seconds: u64,

    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_pending_timeout_seconds")]
    pub pending_timeout_seconds: u64,

    #[serde(default = "default_replay_max_age_hours")]
    pub replay_max_age_hours: i64,

    #[serde(default = "default_replay_min_success_rate")]
    pub replay_min_success_rate: f64,

    /// Number of recent task results in the rolling success rate
    #[serde(default = "default_stats_window")]
    pub stats_window: usize,
}

fn default_mode_tick_seconds() -> u64 {
    10
}
fn default_sweep_interval_seconds() -> u64 {
    60
}
fn default_decision_ttl_seconds() -> u64 {
    3600
}
fn default_recurrence_threshold() -> u32 {
    3
}
fn default_failure_ttl_seconds() -> u64 {
    86_400
}
fn default_ledger_capacity() -> usize {
    1000
}
fn default_queue_capacity() -> usize {
    256
}
fn default_pending_timeout_seconds() -> u64 {
    30
}
fn default_replay_max_age_hours() -> i64 {
    24
}
fn default_replay_min_success_rate() -> f64 {
    0.5
}
fn default_stats_window() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            modes: ModeTable::default(),
            safety: SafetyGate::default(),
            mode_tick_seconds: default_mode_tick_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            decision_ttl_seconds: default_decision_ttl_seconds(),
            recurrence_threshold: default_recurrence_threshold(),
            failure_ttl_seconds: default_failure_ttl_seconds(),
            ledger_capacity: default_ledger_capacity(),
            queue_capacity: default_queue_capacity(),
            pending_timeout_seconds: default_pending_timeout_seconds(),
            replay_max_age_hours: default_replay_max_age_hours(),
            replay_min_success_rate: default_replay_min_success_rate(),
            stats_window: default_stats_window(),
        }
    }
}

impl EngineConfig {
    pub fn mode_tick_interval(&self) -> Duration {
        Duration::from_secs(self.mode_tick_seconds.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }

    pub fn decision_ttl(&self) -> Duration {
        Duration::from_secs(self.decision_ttl_seconds)
    }

    pub fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_ttl_seconds)
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_seconds)
    }

    pub fn replay_policy(&self) -> ReplayPolicy {
        ReplayPolicy {
            max_age: chrono::Duration::hours(self.replay_max_age_hours),
            min_success_rate: self.replay_min_success_rate,
        }
    }
}

/// HTTP executor endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_executor_url")]
    pub url: String,

    /// Per-request timeout enforced by the HTTP client
    #[serde(default = "default_executor_timeout")]
    pub timeout_seconds: u64,

    /// Bearer token sent with every call
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

fn default_executor_url() -> String {
    "http://127.0.0.1:8765".to_string()
}
fn default_executor_timeout() -> u64 {
    30
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            url: default_executor_url(),
            timeout_seconds: default_executor_timeout(),
            token: None,
        }
    }
}

/// Reasoning collaborator (Fabric pattern)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonerConfig {
    /// Path to the fabric binary; searched on PATH when unset
    #[serde(default)]
    pub binary: Option<PathBuf>,

    #[serde(default = "default_reasoner_pattern")]
    pub pattern: String,

    #[serde(default = "default_reasoner_timeout")]
    pub timeout_seconds: u64,
}

fn default_reasoner_pattern() -> String {
    "sheetops_decide".to_string()
}
fn default_reasoner_timeout() -> u64 {
    60
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            binary: None,
            pattern: default_reasoner_pattern(),
            timeout_seconds: default_reasoner_timeout(),
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to the sheetops state directory
    pub home: PathBuf,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,

    pub engine: EngineConfig,
    pub executor: ExecutorConfig,
    pub reasoner: ReasonerConfig,
}

impl ResolvedConfig {
    /// Default location for the JSONL audit export
    pub fn audit_path(&self) -> PathBuf {
        self.home.join("audit.jsonl")
    }
}

/// Environment overrides, captured once so resolution stays testable
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub home: Option<String>,
    pub executor_url: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            home: std::env::var(HOME_ENV).ok(),
            executor_url: std::env::var(EXECUTOR_URL_ENV).ok(),
        }
    }
}

/// Find config file by searching `start` and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file with environment overrides
pub fn resolve(
    config_file: Option<PathBuf>,
    file: ConfigFile,
    env: EnvOverrides,
    default_home: PathBuf,
) -> ResolvedConfig {
    let home = if let Some(env_home) = env.home {
        PathBuf::from(env_home)
    } else if let (Some(home_path), Some(config_path)) = (&file.home, &config_file) {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let mut executor = file.executor;
    if let Some(url) = env.executor_url {
        executor.url = url;
    }

    ResolvedConfig {
        home,
        config_file,
        engine: file.engine,
        executor,
        reasoner: file.reasoner,
    }
}

/// Load configuration from all sources, starting discovery at the
/// current directory
pub fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let config_file = find_config_file(&cwd);

    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    Ok(resolve(config_file, file, EnvOverrides::from_env(), default_home))
}
