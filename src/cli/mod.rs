//! Command-line interface for sheetops.
//!
//! Provides commands for submitting a single request, running an
//! interactive session with admin commands, inspecting the resolved
//! configuration, and reading exported audit files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::adapters::{FabricReasoner, HttpExecutor};
use crate::config::{self, ResolvedConfig};
use crate::core::{Orchestrator, SnapshotLedger};
use crate::domain::{ExecutionOutcome, SubmitResponse, VersionedSnapshot};

/// sheetops - Resilient orchestration for spreadsheet automation
#[derive(Parser, Debug)]
#[command(name = "sheetops")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Export the snapshot ledger to this JSONL file on exit
    #[arg(long, global = true, env = "SHEETOPS_AUDIT")]
    pub audit: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one request through a fresh engine
    Submit {
        /// Request text
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read requests from stdin, one per line (`:help` lists admin commands)
    Repl,

    /// Show resolved configuration
    Config,

    /// Print entries from an exported audit file
    Audit {
        /// JSONL file written by --audit
        path: PathBuf,

        /// Maximum number of entries to show (newest last)
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit { request, json } => {
                submit_once(&request.join(" "), json, self.audit.as_deref()).await
            }
            Commands::Repl => repl(self.audit.as_deref()).await,
            Commands::Config => show_config(),
            Commands::Audit { path, limit } => show_audit(&path, limit).await,
        }
    }
}

/// Build and start an engine wired to the configured collaborators
fn build_engine(cfg: &ResolvedConfig) -> Result<Orchestrator> {
    let executor = HttpExecutor::new(&cfg.executor)?;
    let reasoner = FabricReasoner::new(&cfg.reasoner);

    let engine = Orchestrator::new(cfg.engine.clone(), Arc::new(executor), Arc::new(reasoner));
    engine.start();
    Ok(engine)
}

async fn finish(engine: Orchestrator, audit: Option<&Path>) -> Result<()> {
    engine.shutdown().await;

    if let Some(path) = audit {
        let written = engine.ledger().export_jsonl(path).await?;
        eprintln!("[Exported {} snapshot(s) to {}]", written, path.display());
    }
    Ok(())
}

/// Submit a single request and print the outcome
async fn submit_once(request: &str, json: bool, audit: Option<&Path>) -> Result<()> {
    let cfg = config::load_config()?;
    let engine = build_engine(&cfg)?;

    let response = engine.submit(request).await;
    let success = match &response {
        Ok(response) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(response).context("Failed to serialize response")?
                );
            } else {
                print_response(response);
            }
            response.outcome.is_success()
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            false
        }
    };

    finish(engine, audit).await?;

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

/// A parsed REPL line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Request(String),
    Stats,
    Health,
    Cache,
    ClearCache,
    Failures,
    Mode,
    Snapshot,
    Ledger,
    Replay(u64),
    Help,
    Quit,
    Empty,
    Invalid(String),
}

/// Parse one line of REPL input
pub fn parse_repl_line(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }

    let Some(command) = line.strip_prefix(':') else {
        return ReplCommand::Request(line.to_string());
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("stats"), None) => ReplCommand::Stats,
        (Some("health"), None) => ReplCommand::Health,
        (Some("cache"), None) => ReplCommand::Cache,
        (Some("clear-cache"), None) => ReplCommand::ClearCache,
        (Some("failures"), None) => ReplCommand::Failures,
        (Some("mode"), None) => ReplCommand::Mode,
        (Some("snapshot"), None) => ReplCommand::Snapshot,
        (Some("ledger"), None) => ReplCommand::Ledger,
        (Some("replay"), Some(id)) => match id.parse() {
            Ok(id) => ReplCommand::Replay(id),
            Err(_) => ReplCommand::Invalid(format!("invalid snapshot id: {}", id)),
        },
        (Some("help"), None) => ReplCommand::Help,
        (Some("quit") | Some("exit") | Some("q"), None) => ReplCommand::Quit,
        _ => ReplCommand::Invalid(format!("unknown command: {}", line)),
    }
}

const REPL_HELP: &str = "\
Type a request, or one of:
  :stats           aggregate task stats
  :health          health check
  :cache           result cache status
  :clear-cache     drop cached results and decisions
  :failures        failure ledger stats
  :mode            current operation mode
  :snapshot        current decision snapshot
  :ledger          recent versioned snapshots
  :replay <id>     replay a recorded decision
  :quit            exit";

/// Interactive session against one long-lived engine
async fn repl(audit: Option<&Path>) -> Result<()> {
    let cfg = config::load_config()?;
    let engine = build_engine(&cfg)?;

    eprintln!(
        "sheetops {} ({} mode). :help for commands.",
        env!("CARGO_PKG_VERSION"),
        engine.get_operation_mode_name()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match parse_repl_line(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Quit => break,
            ReplCommand::Help => println!("{}", REPL_HELP),
            ReplCommand::Invalid(message) => eprintln!("{}", message),
            ReplCommand::Request(request) => match engine.submit(&request).await {
                Ok(response) => print_response(&response),
                Err(e) => eprintln!("Error: {}", e),
            },
            ReplCommand::Replay(id) => match engine.replay_decision(id).await {
                Ok(response) => print_response(&response),
                Err(e) => eprintln!("Error: {}", e),
            },
            ReplCommand::Stats => print_json(&engine.get_stats())?,
            ReplCommand::Health => print_json(&engine.health_check())?,
            ReplCommand::Cache => print_json(&engine.get_cache_status())?,
            ReplCommand::ClearCache => {
                engine.clear_cache();
                println!("Caches cleared");
            }
            ReplCommand::Failures => print_json(&engine.get_failure_stats())?,
            ReplCommand::Mode => print_json(&engine.mode_profile())?,
            ReplCommand::Snapshot => print_json(&engine.get_decision_snapshot())?,
            ReplCommand::Ledger => {
                print_json(&engine.get_snapshot_stats())?;
                print_snapshots(&engine.ledger().recent(10));
            }
        }
    }

    finish(engine, audit).await
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize value")?
    );
    Ok(())
}

fn print_response(response: &SubmitResponse) {
    println!("Snapshot: #{}", response.snapshot_id);
    println!("Layer:    {}", response.layer);
    if let Some(decision) = &response.decision_text {
        println!("Decision: {}", decision);
    }

    match &response.outcome {
        ExecutionOutcome::Blocked { reason } => {
            println!("Blocked:  {}", reason);
            println!("          (rephrase with explicit targets to proceed)");
        }
        ExecutionOutcome::Answered { text } => println!("Answer:   {}", text),
        ExecutionOutcome::RecurringFailure {
            signature,
            replay_error,
        } => {
            println!("Recurring failure: {}", signature);
            println!("Replay unavailable: {}", replay_error);
        }
        outcome => {
            let label = match outcome {
                ExecutionOutcome::Replayed { source_id, .. } => format!("Replayed #{}", source_id),
                ExecutionOutcome::Succeeded { .. } => "Succeeded".to_string(),
                _ => "Failed".to_string(),
            };
            println!("{}:", label);
            for result in outcome.results() {
                let marker = if result.success { "ok" } else { "!!" };
                let cached = if result.cached { " (cached)" } else { "" };
                match &result.error {
                    None => println!("  [{}] {}{}: {}", marker, result.tool_name, cached, result.payload),
                    Some(e) => println!("  [{}] {}: {}", marker, result.tool_name, e),
                }
            }
        }
    }
}

fn print_snapshots(entries: &[VersionedSnapshot]) {
    if entries.is_empty() {
        println!("No snapshots recorded");
        return;
    }

    println!(
        "{:<6} {:<20} {:<9} {:<8} {:<7} {}",
        "ID", "TIME", "MODE", "OK", "REPLAY", "REQUEST"
    );
    println!("{}", "-".repeat(75));
    for entry in entries {
        println!(
            "{:<6} {:<20} {:<9} {:<8} {:<7} {}",
            entry.id,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.mode,
            entry.success,
            entry.replay_count,
            entry.request_text
        );
    }
}

/// Print entries from an exported audit file
async fn show_audit(path: &Path, limit: usize) -> Result<()> {
    let ledger = SnapshotLedger::load_jsonl(path, usize::MAX).await?;
    let stats = ledger.stats();

    println!(
        "{} snapshot(s), {} successful, {} replayed",
        stats.live_entries, stats.successful, stats.replayed
    );
    println!();
    print_snapshots(&ledger.recent(limit));
    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::load_config()?;

    println!("sheetops configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Home:        {}", cfg.home.display());
    println!("Audit file:  {}", cfg.audit_path().display());
    println!();
    println!("Executor:");
    println!("  URL:     {}", cfg.executor.url);
    println!("  Timeout: {}s", cfg.executor.timeout_seconds);
    println!();
    println!("Reasoner:");
    println!(
        "  Binary:  {}",
        cfg.reasoner
            .binary
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(fabric on PATH)".to_string())
    );
    println!("  Pattern: {}", cfg.reasoner.pattern);
    println!();
    println!("Engine:");
    let engine = serde_yaml::to_string(&cfg.engine).context("Failed to render engine config")?;
    for line in engine.lines() {
        println!("  {}", line);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests_and_commands() {
        assert_eq!(
            parse_repl_line("  read A1:B2 on Data "),
            ReplCommand::Request("read A1:B2 on Data".to_string())
        );
        assert_eq!(parse_repl_line(":stats"), ReplCommand::Stats);
        assert_eq!(parse_repl_line(":clear-cache"), ReplCommand::ClearCache);
        assert_eq!(parse_repl_line(":replay 12"), ReplCommand::Replay(12));
        assert_eq!(parse_repl_line(":q"), ReplCommand::Quit);
        assert_eq!(parse_repl_line(""), ReplCommand::Empty);
    }

    #[test]
    fn test_parse_invalid_commands() {
        assert!(matches!(parse_repl_line(":replay x"), ReplCommand::Invalid(_)));
        assert!(matches!(parse_repl_line(":bogus"), ReplCommand::Invalid(_)));
        assert!(matches!(parse_repl_line(":stats now"), ReplCommand::Invalid(_)));
    }

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::parse_from(["sheetops", "--audit", "out.jsonl", "submit", "list", "sheets"]);
        assert_eq!(cli.audit, Some(PathBuf::from("out.jsonl")));
        match cli.command {
            Commands::Submit { request, json } => {
                assert_eq!(request.join(" "), "list sheets");
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
