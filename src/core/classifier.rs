//! Layered decision classifier.
//!
//! Layers are evaluated in precedence order, first match wins:
//! 1. Safety gate (destructive phrases, always blocks)
//! 2. Pattern heuristic (trivial read-only intents)
//! 3. Decision cache (previously recorded decision text, TTL)
//! 4. Rules (unambiguous single-tool intents)
//! 5. Reasoning (external collaborator)
//!
//! The safety gate is numbered layer 2 but checked first, so a request
//! matching both a destructive and a trivial phrase is always blocked.
//! Layers 1-4 are in-memory and ignore the operation mode. The pattern
//! layer only answers requests without a mutating verb.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde_json::json;
use tracing::{debug, instrument};

use crate::adapters::Reasoner;
use crate::domain::{DecisionLayer, DecisionSnapshot};

use super::error::EngineError;
use super::safety::SafetyGate;

/// Default lifetime of a cached decision (1 hour)
pub const DEFAULT_DECISION_TTL: Duration = Duration::from_secs(3600);

/// Classifier verdict
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub layer: DecisionLayer,

    /// Absent when the safety gate blocked the request
    pub decision_text: Option<String>,

    /// Whether the decision may be stored in the decision cache
    pub cacheable: bool,

    /// Matched destructive phrase (safety gate only)
    pub blocked_phrase: Option<String>,
}

impl Classification {
    fn resolved(layer: DecisionLayer, decision_text: String, cacheable: bool) -> Self {
        Self {
            layer,
            decision_text: Some(decision_text),
            cacheable,
            blocked_phrase: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.layer == DecisionLayer::SafetyGate
    }
}

/// Collapse whitespace and strip trailing punctuation, keeping case
pub fn collapse(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(|c: char| matches!(c, '?' | '!' | '.'))
        .trim()
        .to_string()
}

/// Normalize request text for matching and cache keys
pub fn normalize(text: &str) -> String {
    collapse(text).to_lowercase()
}

/// Render a single tool call as decision text
pub fn tool_call(tool: &str, args: serde_json::Value) -> String {
    json!({ "tool": tool, "args": args }).to_string()
}

/// Trivial read-only phrases (layer 1)
const PATTERNS: &[(&[&str], &str)] = &[
    (
        &["which sheet is active", "what sheet is active", "active sheet", "current sheet"],
        "get_active_sheet",
    ),
    (
        &["list the sheets", "list sheets", "list all sheets", "what sheets", "show sheets"],
        "list_sheets",
    ),
    (&["how many rows", "row count", "number of rows"], "get_row_count"),
    (&["used range", "how much data"], "get_used_range"),
];

/// Verbs that make a request a mutation, never a trivial read
const MUTATING_VERBS: &[&str] = &[
    "add", "append", "change", "clear", "copy", "create", "delete", "drop", "edit", "erase",
    "fill", "filter", "format", "freeze", "hide", "insert", "merge", "modify", "move", "paste",
    "protect", "remove", "rename", "replace", "reset", "set", "sort", "unhide", "update",
    "write",
];

fn has_mutating_verb(normalized: &str) -> bool {
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| MUTATING_VERBS.contains(&word))
}

struct Rule {
    pattern: Regex,
    tool: &'static str,
}

/// Unambiguous single-tool intents (layer 4), anchored on the whole request.
/// Matched case-insensitively so captured values keep the user's casing.
const RULE_SOURCES: &[(&str, &str)] = &[
    (r"^(?:create|make|insert|add) (?:a )?chart$", "create_chart"),
    (r"^(?:apply|add) (?:a )?filter$", "apply_filter"),
    (r"^(?:create|make|insert) (?:a )?table$", "create_table"),
    (r"^auto-?fit(?: the)? columns$", "autofit_columns"),
    (r"^freeze(?: the)? (?:header|top row|first row)$", "freeze_panes"),
    (
        r"^(?:add|create|insert) (?:a )?(?:new )?sheet(?: (?:named|called) (?P<name>[\w -]+))?$",
        "add_sheet",
    ),
    (r"^sort(?: the)? (?:data|range|table)$", "sort_range"),
];

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        RULE_SOURCES
            .iter()
            .filter_map(|&(src, tool)| {
                RegexBuilder::new(src)
                    .case_insensitive(true)
                    .build()
                    .ok()
                    .map(|pattern| Rule { pattern, tool })
            })
            .collect()
    })
}

fn match_pattern(normalized: &str) -> Option<String> {
    if has_mutating_verb(normalized) {
        return None;
    }
    PATTERNS
        .iter()
        .find(|(phrases, _)| phrases.iter().any(|p| normalized.contains(p)))
        .map(|(_, tool)| tool_call(tool, json!({})))
}

fn match_rule(collapsed: &str) -> Option<String> {
    rules().iter().find_map(|rule| {
        let caps = rule.pattern.captures(collapsed)?;
        let args = match caps.name("name") {
            Some(name) => json!({ "name": name.as_str().trim() }),
            None => json!({}),
        };
        Some(tool_call(rule.tool, args))
    })
}

struct CachedDecision {
    decision_text: String,
    stored_at: DateTime<Utc>,
}

/// Decision cache keyed by normalized request text (layer 3)
pub struct DecisionCache {
    entries: RwLock<HashMap<String, CachedDecision>>,
    ttl: Duration,
}

impl DecisionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn is_fresh(&self, entry: &CachedDecision, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.stored_at)
            .to_std()
            .map(|age| age <= self.ttl)
            .unwrap_or(true)
    }

    pub fn get(&self, normalized: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(normalized)
            .filter(|entry| self.is_fresh(entry, Utc::now()))
            .map(|entry| entry.decision_text.clone())
    }

    pub fn insert(&self, normalized: &str, decision_text: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            normalized.to_string(),
            CachedDecision {
                decision_text: decision_text.to_string(),
                stored_at: Utc::now(),
            },
        );
    }

    /// Drop decisions older than the TTL as of `now`
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| self.is_fresh(entry, now));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The layered classifier
pub struct Classifier {
    safety: SafetyGate,
    decisions: DecisionCache,
    reasoner: Arc<dyn Reasoner>,
}

impl Classifier {
    pub fn new(safety: SafetyGate, decision_ttl: Duration, reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            safety,
            decisions: DecisionCache::new(decision_ttl),
            reasoner,
        }
    }

    pub fn decision_cache(&self) -> &DecisionCache {
        &self.decisions
    }

    /// Evaluate the in-memory layers only. `None` means the request needs
    /// the reasoning layer.
    pub fn classify_local(&self, request: &str) -> Option<Classification> {
        let collapsed = collapse(request);
        let normalized = collapsed.to_lowercase();

        if let Err(EngineError::SafetyBlocked { phrase }) = self.safety.check(&normalized) {
            return Some(Classification {
                layer: DecisionLayer::SafetyGate,
                decision_text: None,
                cacheable: false,
                blocked_phrase: Some(phrase),
            });
        }

        if let Some(text) = match_pattern(&normalized) {
            return Some(Classification::resolved(DecisionLayer::Pattern, text, false));
        }

        if let Some(text) = self.decisions.get(&normalized) {
            return Some(Classification::resolved(DecisionLayer::DecisionCache, text, false));
        }

        match_rule(&collapsed).map(|text| Classification::resolved(DecisionLayer::Rule, text, false))
    }

    /// Classify a request, falling back to the reasoner
    #[instrument(skip(self, snapshot), fields(mode = %snapshot.mode))]
    pub async fn classify(
        &self,
        request: &str,
        snapshot: &DecisionSnapshot,
    ) -> Result<Classification, EngineError> {
        if let Some(classification) = self.classify_local(request) {
            debug!(layer = %classification.layer, "Resolved without reasoning");
            return Ok(classification);
        }

        let text = self
            .reasoner
            .decide(request, snapshot)
            .await
            .map_err(|e| EngineError::Reasoning(format!("{:#}", e)))?;

        debug!(reasoner = self.reasoner.name(), "Resolved by reasoning");
        Ok(Classification::resolved(DecisionLayer::Reasoning, text, true))
    }

    /// Record a reasoning decision for layer 3
    pub fn remember(&self, request: &str, decision_text: &str) {
        self.decisions.insert(&normalize(request), decision_text);
    }
}
