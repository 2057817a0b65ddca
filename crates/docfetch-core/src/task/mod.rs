//! Download task data model.
//!
//! A task is one requested transfer of a single document from a URL to a
//! destination path. The store owns the authoritative record; everything else
//! holds ids or short-lived copies.

mod validate;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use validate::ValidationError;

/// Task identifier, assigned by the store at enqueue.
pub type TaskId = i64;

/// Lifecycle state of a task. Stored as a lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Queued,
        TaskStatus::Active,
        TaskStatus::Paused,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Parses the stored form. Unknown strings map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(TaskStatus::Queued),
            "active" => Some(TaskStatus::Active),
            "paused" => Some(TaskStatus::Paused),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Completed, Failed and Cancelled: no automatic transition leaves these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// States an operator `retry` is valid from.
    pub fn is_retryable_by_operator(self) -> bool {
        matches!(
            self,
            TaskStatus::Failed | TaskStatus::Paused | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::parse(&s.to_ascii_lowercase()).ok_or_else(|| format!("unknown status: {s}"))
    }
}

/// `last_error` value set when a source demands credentials.
pub const CREDENTIALS_REQUIRED: &str = "credentials_required";

/// Input accepted by enqueue. Produced by source discovery or the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub url: String,
    pub source_id: String,
    #[serde(default)]
    pub priority: i64,
    pub destination_path: PathBuf,
    /// Opaque collaborator metadata; stored and returned, never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl EnqueueRequest {
    pub fn new(
        url: impl Into<String>,
        source_id: impl Into<String>,
        destination_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            url: url.into(),
            source_id: source_id.into(),
            priority: 0,
            destination_path: destination_path.into(),
            metadata: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Full task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: TaskId,
    pub source_id: String,
    pub url: String,
    pub destination_path: PathBuf,
    pub priority: i64,
    pub status: TaskStatus,
    pub bytes_total: Option<u64>,
    pub bytes_downloaded: u64,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Validator (ETag or Last-Modified) replayed in `If-Range` on resume.
    pub resume_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl DownloadTask {
    /// Path of the in-progress body: `<destination>.part`.
    pub fn partial_path(&self) -> PathBuf {
        crate::transfer::partial_path(&self.destination_path)
    }

    /// Resets the record to a fresh Queued state (operator retry).
    pub(crate) fn reset_for_retry(&mut self) {
        self.status = TaskStatus::Queued;
        self.attempt_count = 0;
        self.last_error = None;
    }
}
