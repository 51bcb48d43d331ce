//! `engine` crate: graph loading, condition evaluation, scheduling and the
//! execution model that serializes invocations.

pub mod config;
pub mod error;
pub mod expression;
pub mod flow;
pub mod graph;
pub mod scheduler;
pub mod unit;

pub use config::FlowConfig;
pub use error::EngineError;
pub use expression::{EvalError, ExpressionEvaluator, RhaiEvaluator};
pub use flow::{ExecuteRequest, FlowModel, FlowModelBuilder, ResumeRequest};
pub use graph::{EdgeData, FlowGraph, GraphData, LoadReport, NodeData};
pub use scheduler::{ExecutionResult, ExecutionStatus, Scheduler};
