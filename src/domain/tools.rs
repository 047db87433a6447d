//! Static catalog of automation tools.
//!
//! Each tool has a fixed kind, dispatch priority and availability tier.
//! The tier decides which operation modes may use the tool when it is
//! chosen by the reasoning layer.

use serde::{Deserialize, Serialize};

use super::task::{Priority, TaskKind};

/// Availability tier. Critical mode keeps only `Minimal` tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTier {
    Minimal,
    Reduced,
    Full,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub kind: TaskKind,
    pub priority: Priority,
    pub tier: ToolTier,
}

const fn query(name: &'static str) -> ToolSpec {
    ToolSpec {
        name,
        kind: TaskKind::Query,
        priority: Priority::Normal,
        tier: ToolTier::Minimal,
    }
}

const fn action(name: &'static str, priority: Priority, tier: ToolTier) -> ToolSpec {
    ToolSpec {
        name,
        kind: TaskKind::Action,
        priority,
        tier,
    }
}

pub const TOOLS: &[ToolSpec] = &[
    query("get_active_sheet"),
    query("list_sheets"),
    query("get_used_range"),
    query("get_row_count"),
    query("read_range"),
    query("find_values"),
    action("write_range", Priority::Urgent, ToolTier::Minimal),
    action("add_sheet", Priority::Urgent, ToolTier::Reduced),
    action("sort_range", Priority::Urgent, ToolTier::Reduced),
    action("clear_range", Priority::Urgent, ToolTier::Reduced),
    action("delete_sheet", Priority::Urgent, ToolTier::Full),
    action("create_table", Priority::Normal, ToolTier::Reduced),
    action("apply_filter", Priority::Normal, ToolTier::Reduced),
    action("create_chart", Priority::Cosmetic, ToolTier::Full),
    action("format_range", Priority::Cosmetic, ToolTier::Full),
    action("autofit_columns", Priority::Cosmetic, ToolTier::Full),
    action("freeze_panes", Priority::Cosmetic, ToolTier::Full),
];

/// Look up a tool by name
pub fn lookup(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

/// Names of all tools at or below the given tier
pub fn names_up_to(tier: ToolTier) -> Vec<String> {
    TOOLS
        .iter()
        .filter(|t| t.tier <= tier)
        .map(|t| t.name.to_string())
        .collect()
}
