//! Node type registry: `type` string → factory.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{ExecutableNode, NodeError, NodeSpec};

/// Builds the unit for one activation of a node.
pub type NodeFactory =
    Arc<dyn Fn(&NodeSpec) -> Result<Arc<dyn ExecutableNode>, NodeError> + Send + Sync>;

/// Maps node `type` strings to factories.
///
/// Registration must happen before the graph is loaded; node types that
/// are missing at load time are dropped by the loader.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory invoked once per activation.
    pub fn register<F>(&mut self, node_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&NodeSpec) -> Result<Arc<dyn ExecutableNode>, NodeError> + Send + Sync + 'static,
    {
        self.factories.insert(node_type.into(), Arc::new(factory));
        self
    }

    /// Register one instance shared by every activation of `node_type`.
    pub fn register_shared(
        &mut self,
        node_type: impl Into<String>,
        node: Arc<dyn ExecutableNode>,
    ) -> &mut Self {
        self.register(node_type, move |_spec: &NodeSpec| Ok(Arc::clone(&node)))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Build the unit for `spec`.
    ///
    /// # Errors
    /// [`NodeError::Invalid`] if the type is not registered, or whatever
    /// the factory itself returns.
    pub fn create(&self, spec: &NodeSpec) -> Result<Arc<dyn ExecutableNode>, NodeError> {
        let factory = self.factories.get(&spec.node_type).ok_or_else(|| {
            NodeError::Invalid(format!(
                "no implementation registered for node type '{}'",
                spec.node_type
            ))
        })?;
        factory(spec)
    }

    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.node_types().collect();
        types.sort_unstable();
        f.debug_struct("NodeRegistry").field("types", &types).finish()
    }
}
