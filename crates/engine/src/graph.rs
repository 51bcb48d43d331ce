//! Graph loading: turns the editor's `{nodes, edges}` JSON into the
//! static [`FlowGraph`] the scheduler walks.
//!
//! Rules applied:
//! 1. Nodes whose type is not registered are dropped (warning, not fatal).
//! 2. A repeated node id replaces the earlier definition.
//! 3. Each edge becomes an outgoing ref on its source and an incoming ref
//!    on its target. Start nodes never receive incoming refs, and an edge
//!    whose source or target is missing is reported as dangling and never
//!    traversed.
//! 4. Every node of the start type is a default seed for fresh runs.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use nodes::{EdgeRef, NodeRegistry, NodeSpec};

// ---------------------------------------------------------------------------
// Graph input
// ---------------------------------------------------------------------------

/// A node as produced by the diagram editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub properties: Value,
}

/// An edge as produced by the diagram editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeData {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(default)]
    pub properties: Value,
}

/// Raw `{nodes, edges}` graph description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    #[serde(default)]
    pub nodes: Vec<NodeData>,
    #[serde(default)]
    pub edges: Vec<EdgeData>,
}

impl GraphData {
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}

// ---------------------------------------------------------------------------
// Load report
// ---------------------------------------------------------------------------

/// Non-fatal problems found while loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    /// `(node id, type)` of nodes whose type is not registered.
    pub dropped_nodes: Vec<(String, String)>,
    /// Ids of edges with a missing source or target.
    pub dangling_edges: Vec<String>,
    /// Node ids defined more than once.
    pub duplicate_nodes: Vec<String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.dropped_nodes.is_empty()
            && self.dangling_edges.is_empty()
            && self.duplicate_nodes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// FlowGraph
// ---------------------------------------------------------------------------

/// Compiled, immutable workflow graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowGraph {
    nodes: HashMap<String, Arc<NodeSpec>>,
    start_nodes: Vec<String>,
}

impl FlowGraph {
    /// Compile `data` against `registry`.
    pub fn load(
        data: &GraphData,
        registry: &NodeRegistry,
        start_node_type: &str,
    ) -> (Self, LoadReport) {
        let mut report = LoadReport::default();
        let mut specs: HashMap<String, NodeSpec> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for node in &data.nodes {
            if !registry.contains(&node.node_type) {
                warn!(
                    node_id = %node.id,
                    node_type = %node.node_type,
                    "node type not registered, dropping node"
                );
                report.dropped_nodes.push((node.id.clone(), node.node_type.clone()));
                continue;
            }
            let spec =
                NodeSpec::new(node.id.clone(), node.node_type.clone(), node.properties.clone());
            if specs.insert(node.id.clone(), spec).is_some() {
                warn!(node_id = %node.id, "duplicate node id, later definition wins");
                report.duplicate_nodes.push(node.id.clone());
            } else {
                order.push(node.id.clone());
            }
        }

        for edge in &data.edges {
            let has_source = specs.contains_key(&edge.source_node_id);
            let has_target = specs.contains_key(&edge.target_node_id);
            if !(has_source && has_target) {
                warn!(
                    edge_id = %edge.id,
                    source = %edge.source_node_id,
                    target = %edge.target_node_id,
                    "edge references a missing node, it will never be traversed"
                );
                report.dangling_edges.push(edge.id.clone());
            }

            if has_source && has_target {
                if let Some(source) = specs.get_mut(&edge.source_node_id) {
                    source.outgoing.push(EdgeRef {
                        id: edge.id.clone(),
                        peer_node_id: edge.target_node_id.clone(),
                        properties: edge.properties.clone(),
                    });
                }
            }
            if has_target {
                if let Some(target) = specs.get_mut(&edge.target_node_id) {
                    if target.node_type != start_node_type {
                        target.incoming.push(EdgeRef {
                            id: edge.id.clone(),
                            peer_node_id: edge.source_node_id.clone(),
                            properties: edge.properties.clone(),
                        });
                    }
                }
            }
        }

        let start_nodes = order
            .iter()
            .filter(|id| specs.get(*id).is_some_and(|s| s.node_type == start_node_type))
            .cloned()
            .collect();

        let nodes = specs.into_iter().map(|(id, spec)| (id, Arc::new(spec))).collect();
        (Self { nodes, start_nodes }, report)
    }

    pub fn node(&self, node_id: &str) -> Option<&Arc<NodeSpec>> {
        self.nodes.get(node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Start node ids, in input order.
    pub fn start_nodes(&self) -> &[String] {
        &self.start_nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
