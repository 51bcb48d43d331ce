//! `recorder` crate: append-only history of settled activations.
//!
//! The engine appends one [`TaskRecord`] every time an activation settles
//! (completed, interrupted or failed). Backends must bound how many
//! executions they track and evict the oldest one, together with all of
//! its records, once the bound is exceeded.

pub mod error;
pub mod memory;
pub mod models;
pub mod sqlite;

use async_trait::async_trait;

pub use error::RecorderError;
pub use memory::MemoryRecorder;
pub use models::{TaskRecord, TaskStatus};
pub use sqlite::SqliteRecorder;

/// Default bound on the number of tracked executions.
pub const DEFAULT_MAX_EXECUTIONS: usize = 100;

/// Pluggable task history store.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Append a record. A record for an unseen execution starts tracking
    /// it, which may evict the oldest tracked execution.
    async fn add_task(&self, record: TaskRecord) -> Result<(), RecorderError>;

    /// Latest record for `task_id`.
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, RecorderError>;

    /// Task ids of an execution, in the order they were first recorded.
    async fn get_execution_tasks(&self, execution_id: &str) -> Result<Vec<String>, RecorderError>;

    /// Tracked execution ids, oldest first.
    async fn get_executions(&self) -> Result<Vec<String>, RecorderError>;

    /// Drop every execution and record.
    async fn clear(&self) -> Result<(), RecorderError>;

    /// Latest record of every task of an execution, in first-recorded order.
    async fn get_execution_records(
        &self,
        execution_id: &str,
    ) -> Result<Vec<TaskRecord>, RecorderError> {
        let mut records = Vec::new();
        for task_id in self.get_execution_tasks(execution_id).await? {
            if let Some(record) = self.get_task(&task_id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
