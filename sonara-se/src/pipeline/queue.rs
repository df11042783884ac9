//! Durable task queue
//!
//! Queue rows live in the `tasks` table. Workers claim one due row at a
//! time with an atomic `UPDATE ... RETURNING`, so a row is executed by
//! exactly one worker even with many workers on many processes sharing
//! the database.

use chrono::Utc;
use sonara_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::debug;

use super::{ChainStage, ChainState};

/// One claimed task row.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub submission_id: String,
    pub stage: ChainStage,
    pub state: ChainState,
    pub attempts: u32,
}

/// Handle over the `tasks` table.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    pool: SqlitePool,
}

impl TaskQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enqueue a stage for immediate execution.
    pub async fn enqueue(
        &self,
        submission_id: &str,
        stage: ChainStage,
        state: &ChainState,
    ) -> Result<i64> {
        let payload = serde_json::to_string(state)
            .map_err(|e| Error::Internal(format!("task payload serialization failed: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (submission_id, stage, payload, status, next_run_at)
            VALUES (?, ?, ?, 'queued', ?)
            "#,
        )
        .bind(submission_id)
        .bind(stage.as_str())
        .bind(payload)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(task_id = id, submission_id, stage = stage.as_str(), "Task enqueued");
        Ok(id)
    }

    /// Atomically claim the oldest due task, if any.
    pub async fn claim_due(&self) -> Result<Option<TaskRow>> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'running', updated_at = CURRENT_TIMESTAMP
            WHERE id = (
                SELECT id FROM tasks
                WHERE status = 'queued' AND next_run_at <= ?
                ORDER BY id
                LIMIT 1
            )
            RETURNING id, submission_id, stage, payload, attempts
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row.get("payload");
        let state: ChainState = serde_json::from_str(&payload)
            .map_err(|e| Error::Internal(format!("task payload deserialization failed: {e}")))?;
        let stage_name: String = row.get("stage");

        Ok(Some(TaskRow {
            id: row.get("id"),
            submission_id: row.get("submission_id"),
            stage: ChainStage::parse(&stage_name)?,
            state,
            attempts: row.get::<i64, _>("attempts") as u32,
        }))
    }

    /// Mark a claimed task done and enqueue its successor in one
    /// transaction, so a crash between stages cannot strand the chain
    /// with a completed row and no successor.
    pub async fn complete_and_enqueue(
        &self,
        task_id: i64,
        submission_id: &str,
        next: Option<ChainStage>,
        state: &ChainState,
    ) -> Result<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE tasks SET status = 'done', updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        let mut next_id = None;
        if let Some(stage) = next {
            let payload = serde_json::to_string(state)
                .map_err(|e| Error::Internal(format!("task payload serialization failed: {e}")))?;
            let result = sqlx::query(
                r#"
                INSERT INTO tasks (submission_id, stage, payload, status, next_run_at)
                VALUES (?, ?, ?, 'queued', ?)
                "#,
            )
            .bind(submission_id)
            .bind(stage.as_str())
            .bind(payload)
            .bind(Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
            next_id = Some(result.last_insert_rowid());
        }

        tx.commit().await?;
        debug!(task_id, next_task = ?next_id, "Stage handoff committed");
        Ok(next_id)
    }

    /// Reschedule a claimed task after a transient failure.
    pub async fn retry_later(
        &self,
        task_id: i64,
        attempts: u32,
        delay: Duration,
        error: &str,
    ) -> Result<()> {
        let next_run_at = Utc::now().timestamp() + delay.as_secs() as i64;
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'queued', attempts = ?, next_run_at = ?, last_error = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(i64::from(attempts))
        .bind(next_run_at)
        .bind(error)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a claimed task permanently failed.
    pub async fn fail(&self, task_id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', last_error = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Return tasks stuck in 'running' to the queue.
    ///
    /// Called once at startup: a row can only be 'running' across a
    /// process start if a previous instance died mid-task.
    pub async fn requeue_stale(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'queued', next_run_at = ?, updated_at = CURRENT_TIMESTAMP
            WHERE status = 'running'
            "#,
        )
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Number of tasks not yet in a terminal state.
    pub async fn pending_count(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM tasks WHERE status IN ('queued', 'running')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// Status of one task row (for tests and diagnostics).
    pub async fn status(&self, task_id: i64) -> Result<Option<String>> {
        let row = sqlx::query("SELECT status FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("status")))
    }
}
