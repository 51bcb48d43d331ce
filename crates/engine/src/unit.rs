//! Node execution unit: one activation of one node.
//!
//! The unit wraps the registered [`ExecutableNode`] and turns whatever it
//! returns into a [`Settlement`] for the scheduler. On success every
//! outgoing edge condition is evaluated concurrently against a snapshot of
//! the global data; a missing condition fires, a failing one does not.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use nodes::{
    ActionParams, ActionResult, ActionStatus, EdgeRef, ExecutableNode, ExecutionContext,
    NodeError, NodeSpec,
};

use crate::expression::{truthy, ExpressionEvaluator};

/// Identity of a running activation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    pub execution_id: String,
    pub task_id: String,
    pub node_id: String,
    pub node_type: String,
    pub properties: Value,
}

impl Activation {
    pub fn new(execution_id: &str, task_id: &str, spec: &NodeSpec) -> Self {
        Self {
            execution_id: execution_id.to_owned(),
            task_id: task_id.to_owned(),
            node_id: spec.id.clone(),
            node_type: spec.node_type.clone(),
            properties: spec.properties.clone(),
        }
    }
}

/// How an activation ended.
#[derive(Debug, Clone)]
pub enum Settlement {
    /// Finished; `outgoing` holds the edges whose condition held.
    Completed {
        activation: Activation,
        outgoing: Vec<EdgeRef>,
        detail: Option<Value>,
    },
    /// Suspended until resumed with the same `(execution, task, node)`.
    Interrupted {
        activation: Activation,
        detail: Option<Value>,
    },
    /// Reported an error status, failed, or could not be built.
    Failed {
        activation: Activation,
        detail: Value,
    },
}

impl Settlement {
    pub fn activation(&self) -> &Activation {
        match self {
            Self::Completed { activation, .. }
            | Self::Interrupted { activation, .. }
            | Self::Failed { activation, .. } => activation,
        }
    }

    /// Failure carrying `{ "message": .. }`.
    pub fn failed(activation: Activation, message: impl Into<String>) -> Self {
        Self::Failed {
            activation,
            detail: json!({ "message": message.into() }),
        }
    }
}

/// One activation, ready to run.
pub struct NodeUnit {
    activation: Activation,
    node: Arc<dyn ExecutableNode>,
    ctx: ExecutionContext,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl NodeUnit {
    pub fn new(
        activation: Activation,
        node: Arc<dyn ExecutableNode>,
        ctx: ExecutionContext,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> Self {
        Self { activation, node, ctx, evaluator }
    }

    pub fn activation(&self) -> &Activation {
        &self.activation
    }

    fn params(&self, data: Option<Value>) -> ActionParams {
        ActionParams {
            execution_id: self.activation.execution_id.clone(),
            task_id: self.activation.task_id.clone(),
            node_id: self.activation.node_id.clone(),
            data,
        }
    }

    /// Run `action` and settle.
    pub async fn execute(self, data: Option<Value>) -> Settlement {
        let params = self.params(data);
        let result = self.node.action(&params, &self.ctx).await;
        self.settle(result).await
    }

    /// Run `on_resume` and settle the same way a fresh activation would.
    pub async fn resume(self, data: Option<Value>) -> Settlement {
        let params = self.params(data);
        let result = self.node.on_resume(&params, &self.ctx).await;
        self.settle(result).await
    }

    async fn settle(self, result: Result<ActionResult, NodeError>) -> Settlement {
        match result {
            Ok(ActionResult { status: ActionStatus::Success, detail }) => {
                let outgoing = self.firing_edges().await;
                debug!(
                    execution_id = %self.activation.execution_id,
                    node_id = %self.activation.node_id,
                    task_id = %self.activation.task_id,
                    firing = outgoing.len(),
                    "activation completed"
                );
                Settlement::Completed { activation: self.activation, outgoing, detail }
            }
            Ok(ActionResult { status: ActionStatus::Interrupted, detail }) => {
                Settlement::Interrupted { activation: self.activation, detail }
            }
            Ok(ActionResult { status: ActionStatus::Error, detail }) => Settlement::Failed {
                activation: self.activation,
                detail: detail.unwrap_or_else(|| json!({ "message": "node reported an error" })),
            },
            Err(e) => Settlement::failed(self.activation, e.to_string()),
        }
    }

    /// Outgoing edges whose condition holds, in declaration order.
    async fn firing_edges(&self) -> Vec<EdgeRef> {
        let scope = self.ctx.global.snapshot();
        let checks = self.ctx.node.outgoing.iter().map(|edge| {
            let scope = Arc::clone(&scope);
            async move {
                let Some(expression) = edge.condition_expression() else {
                    return true;
                };
                match self.evaluator.evaluate(expression, &scope).await {
                    Ok(value) => truthy(&value),
                    Err(e) => {
                        warn!(
                            execution_id = %self.activation.execution_id,
                            node_id = %self.activation.node_id,
                            edge_id = %edge.id,
                            error = %e,
                            "edge condition failed, treating as false"
                        );
                        false
                    }
                }
            }
        });
        let verdicts = join_all(checks).await;

        self.ctx
            .node
            .outgoing
            .iter()
            .zip(verdicts)
            .filter_map(|(edge, fires)| fires.then(|| edge.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::RhaiEvaluator;
    use nodes::mock::{waiting_detail, MockNode};
    use nodes::GlobalData;
    use serde_json::Map;

    fn spec_with_edges(edges: &[(&str, Option<&str>)]) -> Arc<NodeSpec> {
        let mut spec = NodeSpec::new("a", "TaskNode", json!({ "label": "A" }));
        for (i, (target, condition)) in edges.iter().enumerate() {
            let properties = match condition {
                Some(expr) => json!({ "conditionExpression": expr }),
                None => Value::Null,
            };
            spec.outgoing.push(EdgeRef {
                id: format!("e{i}"),
                peer_node_id: (*target).to_owned(),
                properties,
            });
        }
        Arc::new(spec)
    }

    fn unit(node: Arc<dyn ExecutableNode>, spec: Arc<NodeSpec>, global: GlobalData) -> NodeUnit {
        let activation = Activation::new("exec", "task", &spec);
        let ctx = ExecutionContext { node: spec, context: Arc::new(Value::Null), global };
        NodeUnit::new(activation, node, ctx, Arc::new(RhaiEvaluator::new()))
    }

    fn targets(settlement: &Settlement) -> Vec<String> {
        match settlement {
            Settlement::Completed { outgoing, .. } => {
                outgoing.iter().map(|e| e.peer_node_id.clone()).collect()
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    fn global(value: Value) -> GlobalData {
        GlobalData::new(value.as_object().cloned().unwrap_or_else(Map::new))
    }

    #[tokio::test]
    async fn conditions_select_the_firing_edges() {
        let spec = spec_with_edges(&[("b", Some("x > 5")), ("c", Some("x <= 5")), ("d", None)]);
        let unit = unit(Arc::new(MockNode::succeeding("a")), spec, global(json!({ "x": 10 })));

        let settlement = unit.execute(None).await;
        assert_eq!(targets(&settlement), vec!["b", "d"]);
    }

    #[tokio::test]
    async fn failing_condition_does_not_fire() {
        let spec = spec_with_edges(&[("b", Some("undefined_var > 1")), ("c", Some("true"))]);
        let unit = unit(Arc::new(MockNode::succeeding("a")), spec, GlobalData::default());

        assert_eq!(targets(&unit.execute(None).await), vec!["c"]);
    }

    #[tokio::test]
    async fn conditions_see_data_merged_by_the_action() {
        let spec = spec_with_edges(&[("b", Some("approved"))]);
        let node = MockNode::succeeding("a").with_patch(json!({ "approved": true }));
        let unit = unit(Arc::new(node), spec, GlobalData::default());

        assert_eq!(targets(&unit.execute(None).await), vec!["b"]);
    }

    #[tokio::test]
    async fn interrupted_action_skips_edges() {
        let spec = spec_with_edges(&[("b", None)]);
        let unit = unit(
            Arc::new(MockNode::interrupting("a", waiting_detail())),
            spec,
            GlobalData::default(),
        );

        match unit.execute(None).await {
            Settlement::Interrupted { activation, detail } => {
                assert_eq!(activation.node_id, "a");
                assert_eq!(detail, Some(waiting_detail()));
            }
            other => panic!("expected interruption, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn node_errors_become_failures() {
        let spec = spec_with_edges(&[("b", None)]);
        let unit = unit(
            Arc::new(MockNode::failing_fatal("a", "boom")),
            spec,
            GlobalData::default(),
        );

        match unit.execute(None).await {
            Settlement::Failed { detail, .. } => {
                assert!(detail["message"].as_str().unwrap().contains("boom"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resume_continues_along_the_edges() {
        let spec = spec_with_edges(&[("b", None)]);
        let node = Arc::new(MockNode::interrupting("a", waiting_detail()));
        let unit = unit(node.clone(), spec, GlobalData::default());

        let settlement = unit.resume(Some(json!({ "ok": true }))).await;
        assert_eq!(targets(&settlement), vec!["b"]);
        assert_eq!(node.resume_count(), 1);
        assert_eq!(node.call_count(), 0);
    }
}
