//! SQLite-backed recorder.
//!
//! Records survive the process, which is what lets an interrupted
//! execution be resumed from a later invocation of the CLI.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, SqliteConnection};
use tracing::{debug, info};

use crate::{Recorder, RecorderError, TaskRecord, TaskStatus, DEFAULT_MAX_EXECUTIONS};

/// Create a connection pool for `database_url`, creating the file if needed.
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<SqlitePool, RecorderError> {
    info!("Opening recorder database (max_connections={})", max_connections);
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    // An in-memory database lives only as long as its connection.
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(None::<Duration>)
        .max_lifetime(None::<Duration>)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Run the embedded migrations in `crates/recorder/migrations`.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), RecorderError> {
    info!("Running recorder migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, FromRow)]
struct TaskRecordRow {
    execution_id: String,
    task_id: String,
    node_id: String,
    node_type: String,
    timestamp: i64,
    properties: String,
    status: Option<String>,
    detail: Option<String>,
}

impl TryFrom<TaskRecordRow> for TaskRecord {
    type Error = RecorderError;

    fn try_from(row: TaskRecordRow) -> Result<Self, Self::Error> {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(row.timestamp)
            .ok_or_else(|| RecorderError::Corrupt(format!("bad timestamp {}", row.timestamp)))?;
        let status = row
            .status
            .map(|s| TaskStatus::from_str(&s).map_err(RecorderError::Corrupt))
            .transpose()?;
        let detail = row.detail.map(|d| serde_json::from_str(&d)).transpose()?;

        Ok(TaskRecord {
            execution_id: row.execution_id,
            task_id: row.task_id,
            node_id: row.node_id,
            node_type: row.node_type,
            timestamp,
            properties: serde_json::from_str(&row.properties)?,
            status,
            detail,
        })
    }
}

const SELECT_RECORD: &str = "SELECT execution_id, task_id, node_id, node_type, timestamp, \
                             properties, status, detail FROM task_records";

/// Recorder persisting to SQLite through sqlx.
#[derive(Clone)]
pub struct SqliteRecorder {
    pool: SqlitePool,
    max_executions: usize,
}

impl SqliteRecorder {
    /// Wrap an already-migrated pool. `max_executions` is clamped to at least 1.
    pub fn new(pool: SqlitePool, max_executions: usize) -> Self {
        Self {
            pool,
            max_executions: max_executions.max(1),
        }
    }

    /// Open `database_url`, apply migrations and wrap the pool.
    pub async fn connect(database_url: &str, max_executions: usize) -> Result<Self, RecorderError> {
        let max_connections = if database_url.contains(":memory:") { 1 } else { 4 };
        let pool = create_pool(database_url, max_connections).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool, max_executions))
    }

    /// In-memory database, mostly for tests.
    pub async fn in_memory() -> Result<Self, RecorderError> {
        Self::connect("sqlite::memory:", DEFAULT_MAX_EXECUTIONS).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Drop the oldest executions beyond `max_executions`, records included.
async fn evict_oldest(
    conn: &mut SqliteConnection,
    max_executions: usize,
) -> Result<(), RecorderError> {
    let stale: Vec<String> = sqlx::query_scalar(
        "SELECT execution_id FROM executions ORDER BY seq DESC LIMIT -1 OFFSET ?",
    )
    .bind(max_executions as i64)
    .fetch_all(&mut *conn)
    .await?;

    for execution_id in stale {
        sqlx::query("DELETE FROM task_records WHERE execution_id = ?")
            .bind(&execution_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM executions WHERE execution_id = ?")
            .bind(&execution_id)
            .execute(&mut *conn)
            .await?;
        debug!(execution_id = %execution_id, "evicted execution history");
    }
    Ok(())
}

#[async_trait]
impl Recorder for SqliteRecorder {
    async fn add_task(&self, record: TaskRecord) -> Result<(), RecorderError> {
        let properties = serde_json::to_string(&record.properties)?;
        let detail = record.detail.as_ref().map(serde_json::to_string).transpose()?;

        let mut tx = self.pool.begin().await?;

        let new_execution =
            sqlx::query("INSERT OR IGNORE INTO executions (execution_id) VALUES (?)")
                .bind(&record.execution_id)
                .execute(&mut *tx)
                .await?
                .rows_affected()
                > 0;

        sqlx::query(
            r#"
            INSERT INTO task_records
                (execution_id, task_id, node_id, node_type, timestamp, properties, status, detail)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.execution_id)
        .bind(&record.task_id)
        .bind(&record.node_id)
        .bind(&record.node_type)
        .bind(record.timestamp.timestamp_millis())
        .bind(properties)
        .bind(record.status.map(|s| s.to_string()))
        .bind(detail)
        .execute(&mut *tx)
        .await?;

        if new_execution {
            evict_oldest(&mut tx, self.max_executions).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, RecorderError> {
        let row = sqlx::query_as::<_, TaskRecordRow>(&format!(
            "{SELECT_RECORD} WHERE task_id = ? ORDER BY seq DESC LIMIT 1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskRecord::try_from).transpose()
    }

    async fn get_execution_tasks(&self, execution_id: &str) -> Result<Vec<String>, RecorderError> {
        let task_ids = sqlx::query_scalar(
            r#"
            SELECT task_id FROM task_records
            WHERE execution_id = ?
            GROUP BY task_id
            ORDER BY MIN(seq)
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(task_ids)
    }

    async fn get_executions(&self) -> Result<Vec<String>, RecorderError> {
        let ids = sqlx::query_scalar("SELECT execution_id FROM executions ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn clear(&self) -> Result<(), RecorderError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM task_records").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM executions").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(execution_id: &str, task_id: &str, status: TaskStatus) -> TaskRecord {
        TaskRecord {
            execution_id: execution_id.into(),
            task_id: task_id.into(),
            node_id: "approve".into(),
            node_type: "WaitNode".into(),
            timestamp: Utc::now(),
            properties: json!({ "label": "Approve" }),
            status: Some(status),
            detail: None,
        }
    }

    #[tokio::test]
    async fn record_is_read_back_intact() {
        let recorder = SqliteRecorder::in_memory().await.unwrap();
        let mut rec = record("e1", "t1", TaskStatus::Interrupted);
        rec.detail = Some(json!({ "reason": "waiting" }));
        recorder.add_task(rec.clone()).await.unwrap();

        let stored = recorder.get_task("t1").await.unwrap().expect("stored");
        assert_eq!(stored.execution_id, "e1");
        assert_eq!(stored.node_type, "WaitNode");
        assert_eq!(stored.properties, rec.properties);
        assert_eq!(stored.status, Some(TaskStatus::Interrupted));
        assert_eq!(stored.detail, rec.detail);
        assert_eq!(stored.timestamp.timestamp_millis(), rec.timestamp.timestamp_millis());
    }

    #[tokio::test]
    async fn latest_record_wins_and_task_order_is_kept() {
        let recorder = SqliteRecorder::in_memory().await.unwrap();
        recorder.add_task(record("e1", "t1", TaskStatus::Interrupted)).await.unwrap();
        recorder.add_task(record("e1", "t2", TaskStatus::Success)).await.unwrap();
        recorder.add_task(record("e1", "t1", TaskStatus::Success)).await.unwrap();

        assert_eq!(recorder.get_execution_tasks("e1").await.unwrap(), vec!["t1", "t2"]);
        let latest = recorder.get_task("t1").await.unwrap().unwrap();
        assert_eq!(latest.status, Some(TaskStatus::Success));
    }

    #[tokio::test]
    async fn eviction_cascades_to_records() {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let recorder = SqliteRecorder::new(pool, 2);

        recorder.add_task(record("e1", "t1", TaskStatus::Success)).await.unwrap();
        recorder.add_task(record("e2", "t2", TaskStatus::Success)).await.unwrap();
        recorder.add_task(record("e2", "t3", TaskStatus::Success)).await.unwrap();
        recorder.add_task(record("e3", "t4", TaskStatus::Success)).await.unwrap();

        assert_eq!(recorder.get_executions().await.unwrap(), vec!["e2", "e3"]);
        assert!(recorder.get_task("t1").await.unwrap().is_none());
        assert_eq!(recorder.get_execution_tasks("e2").await.unwrap(), vec!["t2", "t3"]);
    }

    #[tokio::test]
    async fn clear_empties_both_tables() {
        let recorder = SqliteRecorder::in_memory().await.unwrap();
        recorder.add_task(record("e1", "t1", TaskStatus::Success)).await.unwrap();
        recorder.clear().await.unwrap();
        assert!(recorder.get_executions().await.unwrap().is_empty());
        assert!(recorder.get_task("t1").await.unwrap().is_none());
    }
}
