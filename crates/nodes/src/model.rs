//! Static node model built by the graph loader.
//!
//! A [`NodeSpec`] is created once per loaded node and never mutated
//! afterwards; activations share it through an `Arc`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Edge property holding the condition expression.
pub const CONDITION_EXPRESSION: &str = "conditionExpression";

/// One end of an edge, as seen from the node that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRef {
    /// Edge id from the graph input.
    pub id: String,
    /// The node at the other end (target for outgoing, source for incoming).
    pub peer_node_id: String,
    /// Edge properties; may carry a `conditionExpression`.
    #[serde(default)]
    pub properties: Value,
}

impl EdgeRef {
    /// The edge's condition expression, if one is set and non-blank.
    pub fn condition_expression(&self) -> Option<&str> {
        self.properties
            .get(CONDITION_EXPRESSION)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
    }
}

/// A loaded node together with its edge references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub incoming: Vec<EdgeRef>,
    #[serde(default)]
    pub outgoing: Vec<EdgeRef>,
}

impl NodeSpec {
    /// A node with no edges yet.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, properties: Value) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            properties,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edge(properties: Value) -> EdgeRef {
        EdgeRef { id: "e1".into(), peer_node_id: "b".into(), properties }
    }

    #[test]
    fn condition_is_read_from_properties() {
        let e = edge(json!({ "conditionExpression": "x > 5" }));
        assert_eq!(e.condition_expression(), Some("x > 5"));
    }

    #[test]
    fn blank_or_missing_condition_counts_as_none() {
        assert_eq!(edge(Value::Null).condition_expression(), None);
        assert_eq!(edge(json!({ "conditionExpression": "   " })).condition_expression(), None);
        assert_eq!(edge(json!({ "conditionExpression": 42 })).condition_expression(), None);
    }
}
