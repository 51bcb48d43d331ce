//! Record types shared by every recorder backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How an activation settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Interrupted,
    Error,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success     => write!(f, "success"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Error       => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success"     => Ok(Self::Success),
            "interrupted" => Ok(Self::Interrupted),
            "error"       => Ok(Self::Error),
            other         => Err(format!("unknown task status: {other}")),
        }
    }
}

/// History entry for one settled activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub execution_id: String,
    pub task_id: String,
    pub node_id: String,
    pub node_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_its_own_display() {
        for status in [TaskStatus::Success, TaskStatus::Interrupted, TaskStatus::Error] {
            assert_eq!(status.to_string().parse::<TaskStatus>(), Ok(status));
        }
        assert!("paused".parse::<TaskStatus>().is_err());
    }
}
