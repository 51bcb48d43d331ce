//! Engine-level error types.

use thiserror::Error;

/// Invocation-level failures. These are the only errors an `execute` or
/// `resume` caller ever sees; anything that goes wrong inside a single
/// activation settles that activation instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An invocation arrived before any graph was loaded.
    #[error("no graph loaded")]
    NotLoaded,

    /// A fresh run was requested but the graph has no start node.
    #[error("graph has no node of start type '{0}'")]
    NoneStartNode(String),

    /// A directed run named a node the graph does not contain.
    #[error("node not found: '{0}'")]
    NodeNotFound(String),

    /// A resume named a task that is not currently interrupted.
    #[error(
        "task '{task_id}' of node '{node_id}' in execution '{execution_id}' is not interrupted"
    )]
    TaskNotInterrupted {
        execution_id: String,
        task_id: String,
        node_id: String,
    },

    /// The invocation ended without delivering a result.
    #[error("invocation dropped: {0}")]
    Invocation(String),

    #[error("recorder error: {0}")]
    Recorder(#[from] recorder::RecorderError),

    #[error("invalid graph: {0}")]
    Graph(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotLoaded => "NOT_LOADED",
            Self::NoneStartNode(_) => "NONE_START_NODE",
            Self::NodeNotFound(_) => "NONE_NODE_ID",
            Self::TaskNotInterrupted { .. } => "TASK_NOT_INTERRUPTED",
            Self::Invocation(_) => "INVOCATION_DROPPED",
            Self::Recorder(_) => "RECORDER",
            Self::Graph(_) => "INVALID_GRAPH",
            Self::Config(_) => "CONFIG",
        }
    }
}
