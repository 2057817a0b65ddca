//! Operator-driven transitions: enqueue, cancel, pause, resume, retry, remove.

use std::io;
use std::path::Path;

use super::actor::Scheduler;
use super::command::Reply;
use super::manager::ManagerError;
use crate::control::StopReason;
use crate::events::ProgressEvent;
use crate::task::{DownloadTask, EnqueueRequest, TaskId, TaskStatus};
use crate::transfer::discard_partial;

impl Scheduler {
    async fn load(&self, id: TaskId) -> Result<DownloadTask, ManagerError> {
        self.store.get(id).await?.ok_or(ManagerError::NotFound(id))
    }

    /// Persist, then queue bookkeeping, then publish.
    async fn commit(&mut self, task: &mut DownloadTask) -> Result<(), ManagerError> {
        self.store.persist(task).await?;
        if task.status == TaskStatus::Queued {
            if self.shutdown.is_none() {
                self.queue.admit(
                    task.id,
                    &task.source_id,
                    &task.destination_path,
                    task.priority,
                    None,
                );
            }
        } else {
            self.queue.remove(task.id);
        }
        self.events.publish(ProgressEvent::from_task(task));
        self.publish_load();
        Ok(())
    }

    pub(super) async fn enqueue(
        &mut self,
        request: EnqueueRequest,
    ) -> Result<DownloadTask, ManagerError> {
        if self.shutdown.is_some() {
            return Err(ManagerError::ShutDown);
        }
        request.validate()?;
        let task = self.store.insert(&request).await?;
        self.queue.admit(
            task.id,
            &task.source_id,
            &task.destination_path,
            task.priority,
            None,
        );
        self.events.publish(ProgressEvent::from_task(&task));
        self.publish_load();
        tracing::info!(
            task_id = task.id,
            source = %task.source_id,
            priority = task.priority,
            "task enqueued"
        );
        Ok(task)
    }

    /// Ask an active transfer to stop; the reply is sent once it has.
    fn stop_active(&mut self, id: TaskId, reason: StopReason, reply: Reply<DownloadTask>) {
        self.active.request_stop(id, reason);
        self.waiting.entry(id).or_default().push(reply);
        tracing::info!(task_id = id, ?reason, "stop requested for active transfer");
    }

    pub(super) async fn cancel(&mut self, id: TaskId, reply: Reply<DownloadTask>) {
        let mut task = match self.load(id).await {
            Ok(task) => task,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let result = match task.status {
            TaskStatus::Active if self.active.contains(id) => {
                return self.stop_active(id, StopReason::Cancel, reply);
            }
            status if status.is_terminal() => Ok(task),
            _ => {
                task.status = TaskStatus::Cancelled;
                task.last_error = None;
                self.commit(&mut task).await.map(|()| task)
            }
        };
        if result.is_ok() {
            tracing::info!(task_id = id, "task cancelled");
        }
        let _ = reply.send(result);
    }

    pub(super) async fn pause(&mut self, id: TaskId, reply: Reply<DownloadTask>) {
        let mut task = match self.load(id).await {
            Ok(task) => task,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let result = match task.status {
            TaskStatus::Active if self.active.contains(id) => {
                return self.stop_active(id, StopReason::Pause, reply);
            }
            TaskStatus::Paused => Ok(task),
            TaskStatus::Queued | TaskStatus::Active => {
                task.status = TaskStatus::Paused;
                self.commit(&mut task).await.map(|()| task)
            }
            status => Err(ManagerError::InvalidTransition {
                id,
                status,
                op: "pause",
            }),
        };
        let _ = reply.send(result);
    }

    pub(super) async fn resume(&mut self, id: TaskId) -> Result<DownloadTask, ManagerError> {
        let mut task = self.load(id).await?;
        if task.status != TaskStatus::Paused {
            return Err(ManagerError::InvalidTransition {
                id,
                status: task.status,
                op: "resume",
            });
        }
        task.status = TaskStatus::Queued;
        task.last_error = None;
        self.commit(&mut task).await?;
        tracing::info!(task_id = id, "task resumed");
        Ok(task)
    }

    pub(super) async fn retry(&mut self, id: TaskId) -> Result<DownloadTask, ManagerError> {
        let mut task = self.load(id).await?;
        if !task.status.is_retryable_by_operator() {
            return Err(ManagerError::InvalidTransition {
                id,
                status: task.status,
                op: "retry",
            });
        }
        task.reset_for_retry();
        self.commit(&mut task).await?;
        tracing::info!(task_id = id, "task re-queued by operator");
        Ok(task)
    }

    pub(super) async fn remove(&mut self, id: TaskId, delete_files: bool) -> Result<(), ManagerError> {
        let task = self.load(id).await?;
        if task.status == TaskStatus::Active || self.active.contains(id) {
            return Err(ManagerError::InvalidTransition {
                id,
                status: task.status,
                op: "remove",
            });
        }
        self.store.remove(id).await?;
        self.queue.remove(id);
        self.events.forget(id);
        self.publish_load();
        if delete_files {
            remove_if_exists(&task.destination_path)?;
            discard_partial(&task.partial_path()).map_err(anyhow::Error::from)?;
        }
        tracing::info!(task_id = id, delete_files, "task removed");
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<(), ManagerError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(ManagerError::Store(
            anyhow::Error::from(e).context(format!("remove {}", path.display())),
        )),
        _ => Ok(()),
    }
}
