//! The `ExecutableNode` trait: the contract every node type must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ExecutionContext, NodeError};

/// Identity of one activation plus the data handed to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionParams {
    pub execution_id: String,
    pub task_id: String,
    pub node_id: String,
    /// Seed data for a fresh run, or the resume payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Outcome status reported by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Continue along the firing outgoing edges.
    #[default]
    Success,
    /// Suspend this branch until an explicit resume.
    Interrupted,
    /// Settle this branch as failed.
    Error,
}

/// What `action` / `on_resume` hand back to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(default)]
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ActionResult {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn interrupted(detail: Value) -> Self {
        Self {
            status: ActionStatus::Interrupted,
            detail: Some(detail),
        }
    }

    pub fn error(detail: Value) -> Self {
        Self {
            status: ActionStatus::Error,
            detail: Some(detail),
        }
    }
}

/// The core node trait.
///
/// One unit is obtained from the registry per activation. `action` runs
/// the node's business logic; `on_resume` runs when a previously
/// interrupted activation is resumed. Returning from either *is* the
/// continuation: a `Success` result makes the engine evaluate the
/// outgoing edges and schedule the firing targets, exactly as a normal
/// completion does.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    async fn action(
        &self,
        params: &ActionParams,
        ctx: &ExecutionContext,
    ) -> Result<ActionResult, NodeError>;

    async fn on_resume(
        &self,
        _params: &ActionParams,
        _ctx: &ExecutionContext,
    ) -> Result<ActionResult, NodeError> {
        Ok(ActionResult::success())
    }
}
