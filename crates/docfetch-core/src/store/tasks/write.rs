//! Task write operations: insert, persist, progress, remove, recovery.

use anyhow::{bail, Result};

use crate::store::db::{unix_timestamp, TaskStore};
use crate::task::{DownloadTask, EnqueueRequest, TaskId, TaskStatus};

impl TaskStore {
    /// Insert a new Queued task and return the full record.
    pub async fn insert(&self, req: &EnqueueRequest) -> Result<DownloadTask> {
        let now = unix_timestamp();
        let metadata_json = req
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let destination = req.destination_path.to_string_lossy().into_owned();

        let id = sqlx::query(
            r#"
            INSERT INTO tasks (
                source_id, url, destination_path, priority, status,
                bytes_total, bytes_downloaded, attempt_count, last_error,
                resume_token, created_at, updated_at, metadata_json
            ) VALUES (?1, ?2, ?3, ?4, ?5,
                      NULL, 0, 0, NULL,
                      NULL, ?6, ?7, ?8)
            "#,
        )
        .bind(&req.source_id)
        .bind(req.url.trim())
        .bind(&destination)
        .bind(req.priority)
        .bind(TaskStatus::Queued.as_str())
        .bind(now)
        .bind(now)
        .bind(&metadata_json)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(DownloadTask {
            id,
            source_id: req.source_id.clone(),
            url: req.url.trim().to_string(),
            destination_path: req.destination_path.clone(),
            priority: req.priority,
            status: TaskStatus::Queued,
            bytes_total: None,
            bytes_downloaded: 0,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            resume_token: None,
            metadata: req.metadata.clone(),
        })
    }

    /// Write every mutable field of `task` and bump its `updated_at`.
    pub async fn persist(&self, task: &mut DownloadTask) -> Result<()> {
        let now = unix_timestamp();
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET priority = ?1,
                status = ?2,
                bytes_total = ?3,
                bytes_downloaded = ?4,
                attempt_count = ?5,
                last_error = ?6,
                resume_token = ?7,
                updated_at = ?8
            WHERE id = ?9
            "#,
        )
        .bind(task.priority)
        .bind(task.status.as_str())
        .bind(task.bytes_total.map(|n| n as i64))
        .bind(task.bytes_downloaded as i64)
        .bind(task.attempt_count as i64)
        .bind(&task.last_error)
        .bind(&task.resume_token)
        .bind(now)
        .bind(task.id)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            bail!("task {} not found", task.id);
        }
        task.updated_at = now;
        Ok(())
    }

    /// Record transfer progress for an Active task. Never changes status.
    pub async fn update_progress(
        &self,
        id: TaskId,
        bytes_downloaded: u64,
        bytes_total: Option<u64>,
        resume_token: Option<&str>,
    ) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE tasks
            SET bytes_downloaded = ?1,
                bytes_total = ?2,
                resume_token = ?3,
                updated_at = ?4
            WHERE id = ?5 AND status = 'active'
            "#,
        )
        .bind(bytes_downloaded as i64)
        .bind(bytes_total.map(|n| n as i64))
        .bind(resume_token)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a task record. Returns false if it did not exist.
    pub async fn remove(&self, id: TaskId) -> Result<bool> {
        let done = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Reset every Active task to Queued (crash recovery). Returns how many were reset.
    /// Progress and resume token are kept so the next attempt resumes.
    pub async fn recover_active(&self) -> Result<u64> {
        let now = unix_timestamp();
        let done = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'queued',
                updated_at = ?1
            WHERE status = 'active'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected())
    }
}
