//! Built-in node types.
//!
//! - `StartNode` / `TaskNode`: pass straight through to their outgoing edges.
//! - `WaitNode`: suspends its branch until resumed; an object resume payload
//!   is shallow-merged into global data before the branch continues.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::{
    ActionParams, ActionResult, ExecutableNode, ExecutionContext, NodeError, NodeRegistry,
};

pub const START_NODE: &str = "StartNode";
pub const TASK_NODE: &str = "TaskNode";
pub const WAIT_NODE: &str = "WaitNode";

/// A node with no business logic of its own.
pub struct PassNode;

#[async_trait]
impl ExecutableNode for PassNode {
    async fn action(
        &self,
        params: &ActionParams,
        _ctx: &ExecutionContext,
    ) -> Result<ActionResult, NodeError> {
        debug!(node_id = %params.node_id, "pass-through node");
        Ok(ActionResult::success())
    }
}

/// Suspends until an external resume supplies the missing input.
pub struct WaitNode;

#[async_trait]
impl ExecutableNode for WaitNode {
    async fn action(
        &self,
        params: &ActionParams,
        _ctx: &ExecutionContext,
    ) -> Result<ActionResult, NodeError> {
        Ok(ActionResult::interrupted(json!({
            "reason": "waiting",
            "nodeId": params.node_id,
        })))
    }

    async fn on_resume(
        &self,
        params: &ActionParams,
        ctx: &ExecutionContext,
    ) -> Result<ActionResult, NodeError> {
        match &params.data {
            Some(serde_json::Value::Object(patch)) => ctx.global.merge(patch.clone()),
            Some(serde_json::Value::Null) | None => {}
            Some(other) => {
                return Err(NodeError::Fatal(format!(
                    "resume data for '{}' must be an object, got {other}",
                    params.node_id
                )))
            }
        }
        Ok(ActionResult::success())
    }
}

/// Register `StartNode`, `TaskNode` and `WaitNode`.
pub fn register_builtins(registry: &mut NodeRegistry) -> &mut NodeRegistry {
    let pass: Arc<dyn ExecutableNode> = Arc::new(PassNode);
    registry
        .register_shared(START_NODE, Arc::clone(&pass))
        .register_shared(TASK_NODE, pass)
        .register_shared(WAIT_NODE, Arc::new(WaitNode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionStatus, GlobalData, NodeSpec};
    use serde_json::Value;

    fn ctx(global: GlobalData) -> ExecutionContext {
        ExecutionContext {
            node: Arc::new(NodeSpec::new("w", WAIT_NODE, Value::Null)),
            context: Arc::new(Value::Null),
            global,
        }
    }

    fn params(data: Option<Value>) -> ActionParams {
        ActionParams {
            execution_id: "exec".into(),
            task_id: "task".into(),
            node_id: "w".into(),
            data,
        }
    }

    #[test]
    fn builtins_are_registered() {
        let mut registry = NodeRegistry::new();
        register_builtins(&mut registry);
        for ty in [START_NODE, TASK_NODE, WAIT_NODE] {
            assert!(registry.contains(ty), "{ty} missing");
        }
    }

    #[tokio::test]
    async fn wait_node_interrupts_then_merges_resume_data() {
        let global = GlobalData::default();
        let ctx = ctx(global.clone());

        let first = WaitNode.action(&params(None), &ctx).await.unwrap();
        assert_eq!(first.status, ActionStatus::Interrupted);
        assert_eq!(first.detail.unwrap()["reason"], "waiting");

        let resumed = WaitNode
            .on_resume(&params(Some(json!({ "approved": true }))), &ctx)
            .await
            .unwrap();
        assert_eq!(resumed.status, ActionStatus::Success);
        assert_eq!(global.get("approved"), Some(json!(true)));
    }

    #[tokio::test]
    async fn wait_node_rejects_non_object_resume_data() {
        let ctx = ctx(GlobalData::default());
        let result = WaitNode.on_resume(&params(Some(json!([1, 2]))), &ctx).await;
        assert!(matches!(result, Err(NodeError::Fatal(_))));
    }
}
