//! Task and result types for the dispatcher.
//!
//! A task is one call to an automation tool. It is owned by the dispatcher
//! from enqueue until a worker produces its [`TaskResult`].

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tool arguments. A `BTreeMap` keeps keys ordered so the canonical JSON
/// form used for signatures is stable.
pub type Arguments = BTreeMap<String, serde_json::Value>;

/// Whether a task reads or mutates workbook state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Read-only, eligible for caching
    Query,

    /// Mutating, invalidates cached reads on success
    Action,
}

/// Dispatch priority. Lower numbers run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Destructive or urgent work (1)
    Urgent,

    /// Reads and structural changes (2)
    Normal,

    /// Cosmetic changes (3)
    Cosmetic,
}

impl Priority {
    /// Numeric rank (1..=3)
    pub fn rank(self) -> u8 {
        match self {
            Self::Urgent => 1,
            Self::Normal => 2,
            Self::Cosmetic => 3,
        }
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rank())
    }
}

/// A single unit of dispatchable work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task
    pub id: Uuid,

    /// Tool to invoke on the executor
    pub tool_name: String,

    /// Tool arguments (ordered)
    pub arguments: Arguments,

    /// Query or Action
    pub kind: TaskKind,

    /// Dispatch priority
    pub priority: Priority,

    /// When the task was created
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task with the current timestamp
    pub fn new(
        tool_name: impl Into<String>,
        arguments: Arguments,
        kind: TaskKind,
        priority: Priority,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_name: tool_name.into(),
            arguments,
            kind,
            priority,
            created_at: Utc::now(),
        }
    }

    pub fn is_query(&self) -> bool {
        self.kind == TaskKind::Query
    }
}

/// Outcome of executing one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task this result belongs to
    pub task_id: Uuid,

    /// Tool that was invoked
    pub tool_name: String,

    /// Whether the task succeeded
    pub success: bool,

    /// Executor payload (empty on failure)
    pub payload: String,

    /// Error message if failed
    pub error: Option<String>,

    /// Wall-clock time spent on the task
    #[serde(with = "duration_ms")]
    pub duration: Duration,

    /// Served from the result cache without calling the executor
    #[serde(default)]
    pub cached: bool,
}

impl TaskResult {
    /// Create a successful result
    pub fn success(task: &Task, payload: String, duration: Duration) -> Self {
        Self {
            task_id: task.id,
            tool_name: task.tool_name.clone(),
            success: true,
            payload,
            error: None,
            duration,
            cached: false,
        }
    }

    /// Create a failed result
    pub fn failure(task: &Task, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            task_id: task.id,
            tool_name: task.tool_name.clone(),
            success: false,
            payload: String::new(),
            error: Some(error.into()),
            duration,
            cached: false,
        }
    }

    /// Failed result for a call that never became a dispatchable task
    pub fn rejected(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            tool_name: tool_name.into(),
            success: false,
            payload: String::new(),
            error: Some(error.into()),
            duration: Duration::ZERO,
            cached: false,
        }
    }

    /// Mark this result as served from cache
    pub fn from_cache(mut self) -> Self {
        self.cached = true;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent < Priority::Normal);
        assert!(Priority::Normal < Priority::Cosmetic);
        assert_eq!(Priority::Cosmetic.rank(), 3);
    }

    #[test]
    fn test_result_serialization() {
        let task = Task::new("read_range", Arguments::new(), TaskKind::Query, Priority::Normal);
        let result = TaskResult::success(&task, "[[1]]".to_string(), Duration::from_millis(42));

        let json = serde_json::to_string(&result).unwrap();
        let parsed: TaskResult = serde_json::from_str(&json).unwrap();

        assert!(parsed.success);
        assert_eq!(parsed.duration, Duration::from_millis(42));
        assert!(!parsed.cached);
    }
}
