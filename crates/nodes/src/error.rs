//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `action` / `on_resume`, or by a factory
/// asked to build a node unit.
///
/// Either variant settles the activation as *error*; the variant only
/// changes what ends up in the record's `detail.message`.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// The node's business logic failed.
    #[error("fatal node error: {0}")]
    Fatal(String),

    /// The node could not be constructed from its spec (bad properties,
    /// missing capability, …).
    #[error("invalid node: {0}")]
    Invalid(String),
}
