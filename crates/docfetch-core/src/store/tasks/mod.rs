//! Task CRUD, split into reads and writes.

mod read;
mod write;

use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::PathBuf;

use crate::task::{DownloadTask, TaskStatus};

pub(super) const COLUMNS: &str = "id, source_id, url, destination_path, priority, status, \
     bytes_total, bytes_downloaded, attempt_count, last_error, resume_token, \
     created_at, updated_at, metadata_json";

pub(super) fn task_from_row(row: &SqliteRow) -> Result<DownloadTask> {
    let id: i64 = row.get("id");
    let status_str: String = row.get("status");
    let status = TaskStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("task {id}: unknown status {status_str:?}"))?;
    let destination: String = row.get("destination_path");
    let bytes_total: Option<i64> = row.get("bytes_total");
    let bytes_downloaded: i64 = row.get("bytes_downloaded");
    let attempt_count: i64 = row.get("attempt_count");
    let metadata_json: Option<String> = row.get("metadata_json");
    let metadata = metadata_json
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()?;

    Ok(DownloadTask {
        id,
        source_id: row.get("source_id"),
        url: row.get("url"),
        destination_path: PathBuf::from(destination),
        priority: row.get("priority"),
        status,
        bytes_total: bytes_total.map(|n| n.max(0) as u64),
        bytes_downloaded: bytes_downloaded.max(0) as u64,
        attempt_count: attempt_count.clamp(0, u32::MAX as i64) as u32,
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        resume_token: row.get("resume_token"),
        metadata,
    })
}
