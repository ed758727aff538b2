//! Tool-call state reported by agent servers
//!
//! Each state carries exactly the fields that exist for it; decoding keys off
//! the explicit `status` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Start/end timestamps in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolTime {
    pub start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolCallState {
    Pending {
        #[serde(default)]
        input: Map<String, Value>,
    },
    Running {
        #[serde(default)]
        input: Map<String, Value>,
        #[serde(default)]
        title: Option<String>,
        time: ToolTime,
    },
    Completed {
        #[serde(default)]
        input: Map<String, Value>,
        output: String,
        #[serde(default)]
        title: Option<String>,
        time: ToolTime,
    },
    Error {
        #[serde(default)]
        input: Map<String, Value>,
        error: String,
        time: ToolTime,
    },
}

impl ToolCallState {
    /// Still waiting on a result
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending { .. } | Self::Running { .. })
    }

    pub fn input(&self) -> &Map<String, Value> {
        match self {
            Self::Pending { input }
            | Self::Running { input, .. }
            | Self::Completed { input, .. }
            | Self::Error { input, .. } => input,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Running { title, .. } | Self::Completed { title, .. } => title.as_deref(),
            _ => None,
        }
    }

    /// Elapsed time for finished calls
    pub fn duration_ms(&self) -> Option<i64> {
        match self {
            Self::Completed { time, .. } | Self::Error { time, .. } => {
                time.end.map(|end| end - time.start)
            }
            _ => None,
        }
    }

    /// Output on success, error message on failure
    pub fn result_text(&self) -> Option<&str> {
        match self {
            Self::Completed { output, .. } => Some(output),
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }
}
