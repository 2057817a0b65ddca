//! Progress events and the broadcaster that fans them out to subscribers.

mod broadcaster;

use serde::{Deserialize, Serialize};

use crate::task::{DownloadTask, TaskId, TaskStatus};

pub use broadcaster::{Broadcaster, EventStream};

/// State change or progress update for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Synthetic snapshot sent after this subscriber lost events for the task.
    #[serde(default)]
    pub resync: bool,
}

impl ProgressEvent {
    pub fn from_task(task: &DownloadTask) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            bytes_downloaded: task.bytes_downloaded,
            bytes_total: task.bytes_total,
            error: task.last_error.clone(),
            resync: false,
        }
    }
}
