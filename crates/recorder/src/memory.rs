//! In-process recorder.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::{Recorder, RecorderError, TaskRecord, DEFAULT_MAX_EXECUTIONS};

#[derive(Default)]
struct MemoryState {
    /// Tracked executions, oldest first.
    executions: VecDeque<String>,
    /// execution id → task ids in first-recorded order.
    execution_tasks: HashMap<String, Vec<String>>,
    /// task id → latest record.
    tasks: HashMap<String, TaskRecord>,
}

/// Recorder that keeps everything in memory for the life of the process.
pub struct MemoryRecorder {
    max_executions: usize,
    state: Mutex<MemoryState>,
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EXECUTIONS)
    }
}

impl MemoryRecorder {
    /// `max_executions` is clamped to at least 1.
    pub fn new(max_executions: usize) -> Self {
        Self {
            max_executions: max_executions.max(1),
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn max_executions(&self) -> usize {
        self.max_executions
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Recorder for MemoryRecorder {
    async fn add_task(&self, record: TaskRecord) -> Result<(), RecorderError> {
        let mut state = self.state();

        if !state.execution_tasks.contains_key(&record.execution_id) {
            state.executions.push_back(record.execution_id.clone());
            state.execution_tasks.insert(record.execution_id.clone(), Vec::new());

            while state.executions.len() > self.max_executions {
                let Some(evicted) = state.executions.pop_front() else { break };
                let task_ids = state.execution_tasks.remove(&evicted).unwrap_or_default();
                for task_id in &task_ids {
                    state.tasks.remove(task_id);
                }
                debug!(
                    execution_id = %evicted,
                    tasks = task_ids.len(),
                    "evicted execution history"
                );
            }
        }

        if let Some(task_ids) = state.execution_tasks.get_mut(&record.execution_id) {
            if !task_ids.contains(&record.task_id) {
                task_ids.push(record.task_id.clone());
            }
        }
        state.tasks.insert(record.task_id.clone(), record);
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, RecorderError> {
        Ok(self.state().tasks.get(task_id).cloned())
    }

    async fn get_execution_tasks(&self, execution_id: &str) -> Result<Vec<String>, RecorderError> {
        Ok(self
            .state()
            .execution_tasks
            .get(execution_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_executions(&self) -> Result<Vec<String>, RecorderError> {
        Ok(self.state().executions.iter().cloned().collect())
    }

    async fn clear(&self) -> Result<(), RecorderError> {
        *self.state() = MemoryState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskStatus;
    use chrono::Utc;
    use serde_json::{json, Value};

    fn record(execution_id: &str, task_id: &str, status: TaskStatus) -> TaskRecord {
        TaskRecord {
            execution_id: execution_id.into(),
            task_id: task_id.into(),
            node_id: format!("node-{task_id}"),
            node_type: "TaskNode".into(),
            timestamp: Utc::now(),
            properties: Value::Null,
            status: Some(status),
            detail: None,
        }
    }

    #[tokio::test]
    async fn records_are_grouped_by_execution() {
        let recorder = MemoryRecorder::default();
        recorder.add_task(record("e1", "t1", TaskStatus::Success)).await.unwrap();
        recorder.add_task(record("e1", "t2", TaskStatus::Success)).await.unwrap();
        recorder.add_task(record("e2", "t3", TaskStatus::Success)).await.unwrap();

        assert_eq!(recorder.get_execution_tasks("e1").await.unwrap(), vec!["t1", "t2"]);
        assert_eq!(recorder.get_execution_tasks("e2").await.unwrap(), vec!["t3"]);
        assert_eq!(recorder.get_executions().await.unwrap(), vec!["e1", "e2"]);
        assert!(recorder.get_execution_tasks("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn later_record_for_same_task_supersedes_earlier_one() {
        let recorder = MemoryRecorder::default();
        let mut interrupted = record("e1", "t1", TaskStatus::Interrupted);
        interrupted.detail = Some(json!({ "reason": "waiting" }));
        recorder.add_task(interrupted).await.unwrap();
        recorder.add_task(record("e1", "t1", TaskStatus::Success)).await.unwrap();

        let latest = recorder.get_task("t1").await.unwrap().unwrap();
        assert_eq!(latest.status, Some(TaskStatus::Success));
        assert_eq!(recorder.get_execution_tasks("e1").await.unwrap(), vec!["t1"]);
    }

    #[tokio::test]
    async fn oldest_execution_is_evicted_with_its_records() {
        let recorder = MemoryRecorder::new(2);
        recorder.add_task(record("e1", "t1", TaskStatus::Success)).await.unwrap();
        recorder.add_task(record("e2", "t2", TaskStatus::Success)).await.unwrap();
        recorder.add_task(record("e3", "t3", TaskStatus::Success)).await.unwrap();

        assert_eq!(recorder.get_executions().await.unwrap(), vec!["e2", "e3"]);
        assert!(recorder.get_task("t1").await.unwrap().is_none());
        assert!(recorder.get_execution_tasks("e1").await.unwrap().is_empty());
        assert!(recorder.get_task("t3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn execution_records_follow_task_order() {
        let recorder = MemoryRecorder::default();
        recorder.add_task(record("e1", "a", TaskStatus::Success)).await.unwrap();
        recorder.add_task(record("e1", "b", TaskStatus::Interrupted)).await.unwrap();

        let records = recorder.get_execution_records("e1").await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(records[1].status, Some(TaskStatus::Interrupted));
    }

    #[tokio::test]
    async fn clear_forgets_everything() {
        let recorder = MemoryRecorder::default();
        recorder.add_task(record("e1", "t1", TaskStatus::Success)).await.unwrap();
        recorder.clear().await.unwrap();
        assert!(recorder.get_executions().await.unwrap().is_empty());
        assert!(recorder.get_task("t1").await.unwrap().is_none());
    }
}
