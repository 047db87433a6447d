//! Turns decision text into tasks.
//!
//! Decision text is JSON describing tool calls, in one of three shapes:
//! a single `{"tool": .., "args": {..}}` object, an array of them, or
//! `{"tool_calls": [..]}`. Prose and code fences around the JSON are
//! tolerated. Text without any call is a plain answer.

use serde::Deserialize;
use tracing::debug;

use crate::domain::{tools, Arguments, Task};

#[derive(Debug, Clone, Deserialize)]
struct ToolCall {
    #[serde(alias = "name", alias = "tool_name")]
    tool: String,

    #[serde(default, alias = "arguments")]
    args: Arguments,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DecisionBody {
    Wrapped { tool_calls: Vec<ToolCall> },
    Single(ToolCall),
    Many(Vec<ToolCall>),
}

/// Parsed decision
#[derive(Debug, Clone, Default)]
pub struct ParsedDecision {
    /// Tasks for calls naming a catalogued tool, in decision order
    pub tasks: Vec<Task>,

    /// Calls naming tools missing from the catalog
    pub unknown_tools: Vec<String>,
}

impl ParsedDecision {
    pub fn is_answer(&self) -> bool {
        self.tasks.is_empty() && self.unknown_tools.is_empty()
    }
}

/// Find the first balanced JSON object or array in `text`
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c == '{' || c == '[')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse decision text into tasks
pub fn parse(decision_text: &str) -> ParsedDecision {
    let calls = match extract_json(decision_text)
        .and_then(|json| serde_json::from_str::<DecisionBody>(json).ok())
    {
        Some(DecisionBody::Wrapped { tool_calls }) => tool_calls,
        Some(DecisionBody::Single(call)) => vec![call],
        Some(DecisionBody::Many(calls)) => calls,
        None => {
            debug!("Decision text carries no tool calls");
            return ParsedDecision::default();
        }
    };

    let mut parsed = ParsedDecision::default();
    for call in calls {
        match tools::lookup(&call.tool) {
            Some(spec) => parsed
                .tasks
                .push(Task::new(spec.name, call.args, spec.kind, spec.priority)),
            None => parsed.unknown_tools.push(call.tool),
        }
    }
    parsed
}
