//! `nodes` crate: the `ExecutableNode` trait, the static node model, and
//! built-in node implementations.
//!
//! Every node type, built-in or user supplied, implements
//! [`ExecutableNode`] and is registered in a [`NodeRegistry`] under its
//! `type` string. The engine crate looks the registry up for every
//! activation and dispatches through the trait object.

pub mod builtin;
pub mod context;
pub mod error;
pub mod mock;
pub mod model;
pub mod registry;
pub mod traits;

pub use context::{ExecutionContext, GlobalData};
pub use error::NodeError;
pub use model::{EdgeRef, NodeSpec};
pub use registry::{NodeFactory, NodeRegistry};
pub use traits::{ActionParams, ActionResult, ActionStatus, ExecutableNode};
