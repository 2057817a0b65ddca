//! Progress samples from the blocking transfer and the async loop that
//! persists and publishes them.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::events::{Broadcaster, ProgressEvent};
use crate::store::TaskStore;
use crate::task::{TaskId, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProgressSample {
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
    pub resume_token: Option<String>,
}

/// Report when enough bytes or enough time has passed since the last report.
#[derive(Debug)]
pub(crate) struct ProgressThrottle {
    bytes_threshold: u64,
    interval: Duration,
    last_bytes: u64,
    last_at: Instant,
}

impl ProgressThrottle {
    pub(crate) fn new(bytes_threshold: u64, interval: Duration, start_bytes: u64, now: Instant) -> Self {
        Self {
            bytes_threshold,
            interval,
            last_bytes: start_bytes,
            last_at: now,
        }
    }

    pub(crate) fn should_report(&mut self, bytes: u64, now: Instant) -> bool {
        let due = bytes.saturating_sub(self.last_bytes) >= self.bytes_threshold
            || now.saturating_duration_since(self.last_at) >= self.interval;
        if due {
            self.last_bytes = bytes;
            self.last_at = now;
        }
        due
    }
}

/// Persist each sample and publish an Active event. Ends when the sender is dropped.
pub(crate) async fn run_progress_loop(
    mut rx: mpsc::Receiver<ProgressSample>,
    store: TaskStore,
    events: Broadcaster,
    task_id: TaskId,
) {
    while let Some(sample) = rx.recv().await {
        if let Err(e) = store
            .update_progress(
                task_id,
                sample.bytes_downloaded,
                sample.bytes_total,
                sample.resume_token.as_deref(),
            )
            .await
        {
            tracing::warn!(task_id, error = %e, "durable progress update failed");
        }
        events.publish(ProgressEvent {
            task_id,
            status: TaskStatus::Active,
            bytes_downloaded: sample.bytes_downloaded,
            bytes_total: sample.bytes_total,
            error: None,
            resync: false,
        });
    }
}
