//! Stable signatures and cache tags derived from tool calls.
//!
//! Cache keys and failure signatures use the same hash scheme with a
//! distinct namespace, so identical calls always map to identical keys
//! within a namespace and never collide across namespaces.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::domain::{Arguments, Task};

/// Namespace for result cache keys
pub const CACHE_NAMESPACE: &str = "cache";

/// Namespace for failure ledger signatures
pub const FAILURE_NAMESPACE: &str = "failure";

const CYCLE_NAMESPACE: &str = "cycle";

/// Tag attached to entries that read whatever sheet is active
pub const ACTIVE_SHEET_TAG: &str = "sheet:@active";

/// Invalidation-only tag matching every sheet-scoped entry
pub const ANY_SHEET_TAG: &str = "sheet:*";

const SHEET_TAG_PREFIX: &str = "sheet:";

const SHEET_ARGUMENTS: &[&str] = &["sheet", "sheet_name"];

/// Canonical JSON for arguments (sorted keys, no whitespace)
pub fn canonical_arguments(args: &Arguments) -> String {
    serde_json::to_string(args).unwrap_or_default()
}

/// Hash a tool call within a namespace (first 16 bytes of SHA256, hex)
pub fn signature(namespace: &str, tool_name: &str, args: &Arguments) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update([0u8]);
    hasher.update(tool_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_arguments(args).as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

pub fn cache_key(tool_name: &str, args: &Arguments) -> String {
    signature(CACHE_NAMESPACE, tool_name, args)
}

pub fn failure_signature(tool_name: &str, args: &Arguments) -> String {
    signature(FAILURE_NAMESPACE, tool_name, args)
}

/// Signature of a whole cycle.
///
/// A single task keeps its own failure signature so the failure ledger and
/// the snapshot ledger agree; several tasks hash their ordered signatures.
pub fn cycle_signature(tasks: &[Task]) -> String {
    match tasks {
        [] => String::new(),
        [task] => failure_signature(&task.tool_name, &task.arguments),
        _ => {
            let mut hasher = Sha256::new();
            hasher.update(CYCLE_NAMESPACE.as_bytes());
            for task in tasks {
                hasher.update([0u8]);
                hasher.update(failure_signature(&task.tool_name, &task.arguments).as_bytes());
            }
            hex::encode(&hasher.finalize()[..16])
        }
    }
}

fn tag_value(args: &Arguments, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        let value = args.get(*name)?;
        let text = match value {
            serde_json::Value::String(s) => s.trim().to_lowercase(),
            serde_json::Value::Null => return None,
            other => other.to_string(),
        };
        (!text.is_empty()).then_some(text)
    })
}

/// Derive the tag set for a tool call
pub fn derive_tags(tool_name: &str, args: &Arguments) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    tags.insert(format!("tool:{}", tool_name));

    match tag_value(args, SHEET_ARGUMENTS) {
        Some(sheet) => tags.insert(format!("sheet:{}", sheet)),
        None => tags.insert(ACTIVE_SHEET_TAG.to_string()),
    };
    if let Some(workbook) = tag_value(args, &["workbook"]) {
        tags.insert(format!("workbook:{}", workbook));
    }
    if let Some(range) = tag_value(args, &["range", "address"]) {
        tags.insert(format!("range:{}", range));
    }

    tags
}

/// Tags a successful action invalidates.
///
/// Any mutation may have landed on the active sheet, so reads scoped to the
/// active sheet are always included. An action without an explicit sheet
/// may have touched any sheet (the active one is unknown here), so it
/// invalidates every sheet-scoped entry.
pub fn invalidation_tags(tool_name: &str, args: &Arguments) -> BTreeSet<String> {
    let mut tags = derive_tags(tool_name, args);
    tags.insert(ACTIVE_SHEET_TAG.to_string());
    if tag_value(args, SHEET_ARGUMENTS).is_none() {
        tags.insert(ANY_SHEET_TAG.to_string());
    }
    tags
}

/// `tool:` tags are generic and never drive invalidation
pub fn is_scoping_tag(tag: &str) -> bool {
    !tag.starts_with("tool:")
}

/// Whether an invalidating tag hits an entry tag
pub fn tag_matches(invalidating: &str, entry_tag: &str) -> bool {
    if invalidating == ANY_SHEET_TAG {
        return entry_tag.starts_with(SHEET_TAG_PREFIX);
    }
    invalidating == entry_tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, serde_json::Value)]) -> Arguments {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_signature_is_order_independent() {
        let a = args(&[("sheet", json!("Data")), ("range", json!("A1:B2"))]);
        let b = args(&[("range", json!("A1:B2")), ("sheet", json!("Data"))]);

        assert_eq!(cache_key("read_range", &a), cache_key("read_range", &b));
        assert_eq!(cache_key("read_range", &a).len(), 32);
    }

    #[test]
    fn test_signature_differs_on_any_value() {
        let a = args(&[("sheet", json!("Data")), ("range", json!("A1:B2"))]);
        let b = args(&[("sheet", json!("Data")), ("range", json!("A1:B3"))]);

        assert_ne!(cache_key("read_range", &a), cache_key("read_range", &b));
        assert_ne!(cache_key("read_range", &a), cache_key("write_range", &a));
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let a = args(&[("sheet", json!("Data"))]);
        assert_ne!(cache_key("read_range", &a), failure_signature("read_range", &a));
    }

    #[test]
    fn test_derive_tags() {
        let a = args(&[
            ("sheet", json!("Data")),
            ("range", json!("A1:C10")),
            ("workbook", json!("Budget.xlsx")),
        ]);
        let tags = derive_tags("read_range", &a);

        assert!(tags.contains("tool:read_range"));
        assert!(tags.contains("sheet:data"));
        assert!(tags.contains("range:a1:c10"));
        assert!(tags.contains("workbook:budget.xlsx"));
        assert!(!tags.contains(ACTIVE_SHEET_TAG));
    }

    #[test]
    fn test_unscoped_call_reads_active_sheet() {
        let tags = derive_tags("list_sheets", &Arguments::new());
        assert_eq!(tags.len(), 2);
        assert!(tags.contains(ACTIVE_SHEET_TAG));
    }

    #[test]
    fn test_sheetless_action_invalidates_any_sheet() {
        let sort = invalidation_tags("sort_range", &Arguments::new());
        assert!(sort.contains(ANY_SHEET_TAG));
        assert!(tag_matches(ANY_SHEET_TAG, "sheet:data"));
        assert!(!tag_matches(ANY_SHEET_TAG, "range:a1"));

        let scoped = invalidation_tags("sort_range", &args(&[("sheet", json!("Data"))]));
        assert!(!scoped.contains(ANY_SHEET_TAG));
        assert!(!tag_matches("sheet:summary", "sheet:data"));
    }

    #[test]
    fn test_cycle_signature() {
        use crate::domain::{Priority, TaskKind};

        let t1 = Task::new("list_sheets", Arguments::new(), TaskKind::Query, Priority::Normal);
        let t2 = Task::new("get_row_count", Arguments::new(), TaskKind::Query, Priority::Normal);

        assert_eq!(cycle_signature(&[]), "");
        assert_eq!(
            cycle_signature(std::slice::from_ref(&t1)),
            failure_signature("list_sheets", &Arguments::new())
        );
        assert_ne!(
            cycle_signature(&[t1.clone(), t2.clone()]),
            cycle_signature(&[t2, t1])
        );
    }
}
