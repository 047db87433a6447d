//! System-wide degradation state.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::tools::{self, ToolTier};

/// Success rate above which the engine runs in `Normal` mode
pub const NORMAL_THRESHOLD: f64 = 0.75;

/// Success rate at or above which the engine runs in `Degraded` mode
pub const DEGRADED_THRESHOLD: f64 = 0.50;

/// Operation mode, derived from the rolling success rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    Normal,
    Degraded,
    Critical,
}

impl Default for OperationMode {
    fn default() -> Self {
        Self::Normal
    }
}

impl OperationMode {
    /// Map a success rate (0.0..=1.0) to a mode.
    ///
    /// >75% is Normal, 50-75% is Degraded, <50% is Critical.
    pub fn from_success_rate(rate: f64) -> Self {
        if rate > NORMAL_THRESHOLD {
            Self::Normal
        } else if rate >= DEGRADED_THRESHOLD {
            Self::Degraded
        } else {
            Self::Critical
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
        }
    }

    /// Highest tool tier available in this mode
    pub fn tool_tier(self) -> ToolTier {
        match self {
            Self::Normal => ToolTier::Full,
            Self::Degraded => ToolTier::Reduced,
            Self::Critical => ToolTier::Minimal,
        }
    }

    /// Reasoning budget hint handed to the fallback layer
    pub fn reasoning_budget(self) -> ReasoningBudget {
        match self {
            Self::Normal => ReasoningBudget {
                max_tokens: 4096,
                max_tool_calls: 8,
            },
            Self::Degraded => ReasoningBudget {
                max_tokens: 2048,
                max_tool_calls: 4,
            },
            Self::Critical => ReasoningBudget {
                max_tokens: 512,
                max_tool_calls: 1,
            },
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How much reasoning the fallback layer may spend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningBudget {
    pub max_tokens: u32,
    pub max_tool_calls: usize,
}

/// Effective configuration applied for a mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeProfile {
    pub mode: OperationMode,

    /// Worker pool size
    pub workers: usize,

    /// TTL for newly cached results
    #[serde(with = "secs")]
    pub cache_ttl: Duration,

    /// Tools the reasoning layer may use
    pub permitted_tools: Vec<String>,

    pub budget: ReasoningBudget,
}

impl ModeProfile {
    pub fn new(mode: OperationMode, workers: usize, cache_ttl: Duration) -> Self {
        Self {
            mode,
            workers: workers.max(1),
            cache_ttl,
            permitted_tools: tools::names_up_to(mode.tool_tier()),
            budget: mode.reasoning_budget(),
        }
    }

    pub fn permits(&self, tool: &str) -> bool {
        self.permitted_tools.iter().any(|t| t == tool)
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
