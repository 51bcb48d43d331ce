//! Shared state handed to every activation.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};

use crate::NodeSpec;

/// Mutable global data shared by every activation of one flow model.
///
/// Readers get an immutable snapshot; [`GlobalData::merge`] is the only
/// mutation path and performs a shallow merge. The lock only guards the
/// snapshot pointer swap, so concurrent merges race and the last writer
/// wins for any key both of them touch.
#[derive(Debug, Clone, Default)]
pub struct GlobalData {
    inner: Arc<RwLock<Arc<Map<String, Value>>>>,
}

impl GlobalData {
    pub fn new(initial: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// Current contents. Later merges do not affect a snapshot already taken.
    pub fn snapshot(&self) -> Arc<Map<String, Value>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Shallow-merge `patch` into the global data (top-level keys only).
    pub fn merge(&self, patch: Map<String, Value>) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**guard).clone();
        for (key, value) in patch {
            next.insert(key, value);
        }
        *guard = Arc::new(next);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.snapshot().get(key).cloned()
    }
}

/// Environment of one node activation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// The node being activated.
    pub node: Arc<NodeSpec>,
    /// Read-mostly injected capabilities, shared by reference.
    pub context: Arc<Value>,
    /// Global data, shared by reference.
    pub global: GlobalData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn merge_is_shallow() {
        let global = GlobalData::new(map(json!({ "a": { "x": 1, "y": 2 }, "b": 1 })));
        global.merge(map(json!({ "a": { "x": 9 }, "c": true })));

        let snap = global.snapshot();
        assert_eq!(snap["a"], json!({ "x": 9 }));
        assert_eq!(snap["b"], json!(1));
        assert_eq!(snap["c"], json!(true));
    }

    #[test]
    fn snapshot_is_not_affected_by_later_merges() {
        let global = GlobalData::new(map(json!({ "n": 1 })));
        let before = global.snapshot();
        global.merge(map(json!({ "n": 2 })));

        assert_eq!(before["n"], json!(1));
        assert_eq!(global.get("n"), Some(json!(2)));
    }

    #[test]
    fn clones_share_the_same_data() {
        let global = GlobalData::default();
        let other = global.clone();
        other.merge(map(json!({ "k": "v" })));
        assert_eq!(global.get("k"), Some(json!("v")));
    }
}
