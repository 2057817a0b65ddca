//! Applying a finished attempt to its task.

use std::time::Instant;

use super::actor::Scheduler;
use crate::control::StopReason;
use crate::events::ProgressEvent;
use crate::retry::{classify, FailureKind, RetryDecision, TransferError};
use crate::task::{DownloadTask, TaskId, TaskStatus, CREDENTIALS_REQUIRED};
use crate::transfer::{discard_partial, TransferOutcome, TransferReport};

impl Scheduler {
    pub(super) async fn on_finished(&mut self, id: TaskId, report: TransferReport) {
        self.active.unregister(id);
        let Some(mut task) = self.in_flight.remove(&id) else {
            tracing::error!(task_id = id, "finished transfer was not in flight");
            return;
        };
        task.bytes_downloaded = report.bytes_downloaded;
        task.bytes_total = report.bytes_total;
        task.resume_token = report.resume_token;

        let mut not_before = None;
        let mut needs_credentials = false;
        match report.outcome {
            TransferOutcome::Completed => {
                task.attempt_count += 1;
                task.status = TaskStatus::Completed;
                task.last_error = None;
                tracing::info!(task_id = id, bytes = task.bytes_downloaded, "transfer completed");
            }
            TransferOutcome::Stopped(reason) => {
                task.status = match reason {
                    StopReason::Cancel => TaskStatus::Cancelled,
                    StopReason::Pause => TaskStatus::Paused,
                    StopReason::Shutdown => TaskStatus::Queued,
                };
                tracing::info!(task_id = id, ?reason, status = %task.status, "transfer stopped");
            }
            TransferOutcome::Failed(err) => {
                let kind = classify(&err);
                needs_credentials = kind == FailureKind::AuthRequired;
                not_before = self.apply_failure(&mut task, kind, &err);
            }
        }

        if let Err(e) = self.store.persist(&mut task).await {
            tracing::error!(task_id = id, error = %e, "persist transfer outcome failed");
        }
        if task.status == TaskStatus::Queued && self.shutdown.is_none() {
            self.queue.admit(
                task.id,
                &task.source_id,
                &task.destination_path,
                task.priority,
                not_before,
            );
        }
        self.events.publish(ProgressEvent::from_task(&task));
        self.publish_load();
        if needs_credentials {
            self.credentials.credentials_required(&task);
        }
        for reply in self.waiting.remove(&id).unwrap_or_default() {
            let _ = reply.send(Ok(task.clone()));
        }
    }

    /// Classify a failed attempt and set the next state. Returns the backoff
    /// deadline when the task goes back into the queue.
    fn apply_failure(
        &self,
        task: &mut DownloadTask,
        kind: FailureKind,
        err: &TransferError,
    ) -> Option<Instant> {
        if kind == FailureKind::AuthRequired {
            task.status = TaskStatus::Paused;
            task.last_error = Some(CREDENTIALS_REQUIRED.to_string());
            tracing::warn!(task_id = task.id, source = %task.source_id, "credentials required");
            return None;
        }

        if kind.counts_as_attempt() {
            task.attempt_count += 1;
        }
        if kind == FailureKind::Integrity {
            if let Err(e) = discard_partial(&task.partial_path()) {
                tracing::warn!(task_id = task.id, error = %e, "discard partial file failed");
            }
            task.bytes_downloaded = 0;
            task.bytes_total = None;
            task.resume_token = None;
        }
        task.last_error = Some(err.to_string());

        match self.policy.decide(task.attempt_count, kind) {
            RetryDecision::RetryAfter(delay) => {
                task.status = TaskStatus::Queued;
                tracing::warn!(
                    task_id = task.id,
                    attempt = task.attempt_count,
                    ?kind,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed; retrying"
                );
                let now = Instant::now();
                Some(now.checked_add(delay).unwrap_or(now))
            }
            RetryDecision::NoRetry => {
                task.status = TaskStatus::Failed;
                tracing::warn!(
                    task_id = task.id,
                    attempt = task.attempt_count,
                    ?kind,
                    error = %err,
                    "task failed"
                );
                None
            }
        }
    }
}
