//! `MockNode`: a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::{ActionParams, ActionResult, ExecutableNode, ExecutionContext, NodeError};

/// Behaviour injected into `MockNode` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return `ActionStatus::Success`.
    Succeed,
    /// Return `ActionStatus::Interrupted` with the given detail.
    Interrupt(Value),
    /// Return `ActionStatus::Error` with the given detail.
    ErrorStatus(Value),
    /// Fail with a `Fatal` error.
    FailFatal(String),
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when `action` is called.
    pub behaviour: MockBehaviour,
    /// What the node will do when `on_resume` is called.
    pub resume_behaviour: MockBehaviour,
    /// Sleep before answering, to keep sibling branches in flight.
    pub delay: Option<Duration>,
    /// Merged into global data on every `action` call.
    pub patch: Option<Map<String, Value>>,
    /// All `action` params seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<ActionParams>>>,
    /// All `on_resume` params seen by this node (in call order).
    pub resumes: Arc<Mutex<Vec<ActionParams>>>,
    /// Injected context seen by every `action` call.
    pub contexts: Arc<Mutex<Vec<Arc<Value>>>>,
}

impl MockNode {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            resume_behaviour: MockBehaviour::Succeed,
            delay: None,
            patch: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            resumes: Arc::new(Mutex::new(Vec::new())),
            contexts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds.
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Succeed)
    }

    /// Create a mock that interrupts with `detail`, and succeeds on resume.
    pub fn interrupting(name: impl Into<String>, detail: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Interrupt(detail))
    }

    /// Create a mock that reports `ActionStatus::Error`.
    pub fn erroring(name: impl Into<String>, detail: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ErrorStatus(detail))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_patch(mut self, patch: Value) -> Self {
        self.patch = patch.as_object().cloned();
        self
    }

    pub fn on_resume_behaviour(mut self, behaviour: MockBehaviour) -> Self {
        self.resume_behaviour = behaviour;
        self
    }

    /// Number of times `action` has been called.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of times `on_resume` has been called.
    pub fn resume_count(&self) -> usize {
        self.resumes.lock().unwrap().len()
    }

    /// Node ids seen by `action`, in call order.
    pub fn called_nodes(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|p| p.node_id.clone()).collect()
    }

    fn answer(&self, behaviour: &MockBehaviour) -> Result<ActionResult, NodeError> {
        match behaviour {
            MockBehaviour::Succeed => Ok(ActionResult::success()),
            MockBehaviour::Interrupt(detail) => Ok(ActionResult::interrupted(detail.clone())),
            MockBehaviour::ErrorStatus(detail) => Ok(ActionResult::error(detail.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
        }
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn action(
        &self,
        params: &ActionParams,
        ctx: &ExecutionContext,
    ) -> Result<ActionResult, NodeError> {
        self.calls.lock().unwrap().push(params.clone());
        self.contexts.lock().unwrap().push(Arc::clone(&ctx.context));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(patch) = &self.patch {
            ctx.global.merge(patch.clone());
        }
        self.answer(&self.behaviour)
    }

    async fn on_resume(
        &self,
        params: &ActionParams,
        _ctx: &ExecutionContext,
    ) -> Result<ActionResult, NodeError> {
        self.resumes.lock().unwrap().push(params.clone());
        self.answer(&self.resume_behaviour)
    }
}

/// Detail used by tests for a node waiting on outside input.
pub fn waiting_detail() -> Value {
    json!({ "reason": "waiting" })
}
