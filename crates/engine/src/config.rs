//! Flow model configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::EngineError;

/// Conventional start node type.
pub const DEFAULT_START_NODE_TYPE: &str = nodes::builtin::START_NODE;

/// Tuning knobs for a [`crate::FlowModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Nodes of this type seed fresh runs and never get incoming edges.
    pub start_node_type: String,
    /// How many executions the default recorder keeps history for.
    pub max_executions: usize,
    /// Initial global data.
    pub global_data: Map<String, Value>,
    /// Injected capabilities, shared read-only with every node.
    pub context: Value,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            start_node_type: DEFAULT_START_NODE_TYPE.to_owned(),
            max_executions: recorder::DEFAULT_MAX_EXECUTIONS,
            global_data: Map::new(),
            context: Value::Null,
        }
    }
}

impl FlowConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Read a TOML config file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config = FlowConfig::from_toml_str("max_executions = 5").unwrap();
        assert_eq!(config.max_executions, 5);
        assert_eq!(config.start_node_type, "StartNode");
        assert!(config.global_data.is_empty());
    }

    #[test]
    fn config_file_is_loaded() {
        let content = r#"
start_node_type = "begin"

[global_data]
x = 10
region = "eu"

[context]
tenant = "acme"
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(content.as_bytes()).expect("write toml");

        let config = FlowConfig::load(tmp.path()).expect("load config");
        assert_eq!(config.start_node_type, "begin");
        assert_eq!(config.global_data["x"], json!(10));
        assert_eq!(config.global_data["region"], json!("eu"));
        assert_eq!(config.context, json!({ "tenant": "acme" }));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(
            FlowConfig::from_toml_str("max_executions = ["),
            Err(EngineError::Config(_))
        ));
    }
}
