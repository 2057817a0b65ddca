//! The scheduler task: owns all mutable dispatch state.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

use super::command::{Command, Reply};
use crate::control::{ActiveTransfers, StopSignal};
use crate::events::{Broadcaster, ProgressEvent};
use crate::queue::{Pick, QueueEntry, TaskQueue};
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryPolicy, TransferError};
use crate::source::CredentialProvider;
use crate::store::TaskStore;
use crate::task::{DownloadTask, TaskId, TaskStatus};
use crate::transfer::{partial_len, Executor, TransferOutcome, TransferReport};

/// Shortest sleep when the queue is blocked, so a zero hint cannot spin.
const MIN_WAIT: Duration = Duration::from_millis(10);
/// Delay before re-trying a task whose start could not be persisted.
const STORE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Queued and active counts, watched by `wait_idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Load {
    pub queued: usize,
    pub active: usize,
}

impl Load {
    pub(crate) fn is_idle(&self) -> bool {
        self.queued == 0 && self.active == 0
    }
}

pub(super) struct Scheduler {
    rx: mpsc::Receiver<Command>,
    /// Every handle is gone; stop polling the channel.
    rx_closed: bool,
    pub(super) store: TaskStore,
    pub(super) events: Broadcaster,
    pub(super) queue: TaskQueue,
    limiter: RateLimiter,
    pub(super) active: ActiveTransfers,
    /// Tasks currently running, as they were when dispatched.
    pub(super) in_flight: HashMap<TaskId, DownloadTask>,
    /// Replies waiting for an active task to stop.
    pub(super) waiting: HashMap<TaskId, Vec<Reply<DownloadTask>>>,
    running: JoinSet<(TaskId, TransferReport)>,
    executor: Executor,
    pub(super) credentials: Arc<dyn CredentialProvider>,
    pub(super) policy: RetryPolicy,
    max_parallel: usize,
    pub(super) dispatch_paused: bool,
    pub(super) shutdown: Option<Vec<oneshot::Sender<()>>>,
    load_tx: watch::Sender<Load>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        rx: mpsc::Receiver<Command>,
        store: TaskStore,
        events: Broadcaster,
        queue: TaskQueue,
        limiter: RateLimiter,
        executor: Executor,
        credentials: Arc<dyn CredentialProvider>,
        policy: RetryPolicy,
        max_parallel: usize,
        dispatch_paused: bool,
        load_tx: watch::Sender<Load>,
    ) -> Self {
        Self {
            rx,
            rx_closed: false,
            store,
            events,
            queue,
            limiter,
            active: ActiveTransfers::new(),
            in_flight: HashMap::new(),
            waiting: HashMap::new(),
            running: JoinSet::new(),
            executor,
            credentials,
            policy,
            max_parallel: max_parallel.max(1),
            dispatch_paused,
            shutdown: None,
            load_tx,
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            let wait = self.dispatch().await;
            self.publish_load();

            if self.shutdown.is_some() && self.running.is_empty() {
                break;
            }

            tokio::select! {
                cmd = self.rx.recv(), if !self.rx_closed => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        self.rx_closed = true;
                        self.begin_shutdown(None);
                    }
                },
                Some(joined) = self.running.join_next(), if !self.running.is_empty() => {
                    match joined {
                        Ok((id, report)) => self.on_finished(id, report).await,
                        Err(e) => tracing::error!(error = %e, "executor wrapper failed"),
                    }
                }
                _ = sleep_for(wait) => {}
            }
        }

        self.events.close();
        self.publish_load();
        for reply in self.shutdown.take().unwrap_or_default() {
            let _ = reply.send(());
        }
        tracing::info!("scheduler stopped");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue { request, reply } => {
                let result = self.enqueue(request).await;
                let _ = reply.send(result);
            }
            Command::Cancel { id, reply } => self.cancel(id, reply).await,
            Command::Pause { id, reply } => self.pause(id, reply).await,
            Command::Resume { id, reply } => {
                let result = self.resume(id).await;
                let _ = reply.send(result);
            }
            Command::Retry { id, reply } => {
                let result = self.retry(id).await;
                let _ = reply.send(result);
            }
            Command::Remove {
                id,
                delete_files,
                reply,
            } => {
                let result = self.remove(id, delete_files).await;
                let _ = reply.send(result);
            }
            Command::PauseQueue { reply } => {
                self.dispatch_paused = true;
                tracing::info!("dispatch paused");
                let _ = reply.send(Ok(()));
            }
            Command::ResumeQueue { reply } => {
                self.dispatch_paused = false;
                tracing::info!("dispatch resumed");
                let _ = reply.send(Ok(()));
            }
            Command::Shutdown { reply } => self.begin_shutdown(Some(reply)),
        }
    }

    fn begin_shutdown(&mut self, reply: Option<oneshot::Sender<()>>) {
        if self.shutdown.is_none() {
            tracing::info!(active = self.active.len(), "shutting down");
            self.active.stop_all(crate::control::StopReason::Shutdown);
        }
        let waiters = self.shutdown.get_or_insert_with(Vec::new);
        waiters.extend(reply);
    }

    pub(super) fn publish_load(&self) {
        let load = Load {
            queued: self.queue.len(),
            active: self.running.len(),
        };
        self.load_tx.send_if_modified(|current| {
            if *current == load {
                false
            } else {
                *current = load;
                true
            }
        });
    }

    /// Start transfers while slots are free. Returns how long to sleep before
    /// the queue may have something eligible again.
    async fn dispatch(&mut self) -> Option<Duration> {
        if self.dispatch_paused || self.shutdown.is_some() {
            return None;
        }
        while self.running.len() < self.max_parallel {
            let pick = {
                let busy: HashSet<&Path> = self
                    .in_flight
                    .values()
                    .map(|task| task.destination_path.as_path())
                    .collect();
                self.queue.pick(&mut self.limiter, &busy)
            };
            match pick {
                Pick::Ready(entry) => self.start(entry).await,
                Pick::Blocked { retry_in } => return Some(retry_in.max(MIN_WAIT)),
                Pick::Busy | Pick::Empty => return None,
            }
        }
        None
    }

    async fn start(&mut self, entry: QueueEntry) {
        let id = entry.id;
        let mut task = match self.store.get(id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::warn!(task_id = id, "queued task vanished from store");
                self.limiter.refund(&entry.source_id);
                return;
            }
            Err(e) => {
                tracing::error!(task_id = id, error = %e, "load task failed; will retry");
                self.requeue_later(&entry);
                return;
            }
        };

        task.status = TaskStatus::Active;
        if let Err(e) = self.store.persist(&mut task).await {
            tracing::error!(task_id = id, error = %e, "persist Active failed; will retry");
            self.requeue_later(&entry);
            return;
        }
        tracing::info!(
            task_id = id,
            source = %task.source_id,
            attempt = task.attempt_count + 1,
            "transfer dispatched"
        );
        self.events.publish(ProgressEvent::from_task(&task));

        let signal = self.active.register(id);
        self.in_flight.insert(id, task.clone());
        self.spawn_executor(task, signal);
    }

    /// Put back an entry that could not start. Its token was never used.
    fn requeue_later(&mut self, entry: &QueueEntry) {
        self.limiter.refund(&entry.source_id);
        self.queue.admit(
            entry.id,
            &entry.source_id,
            &entry.destination,
            entry.priority,
            Some(std::time::Instant::now() + STORE_RETRY_DELAY),
        );
    }

    /// Run the executor in its own task so a panic becomes a failure of this task only.
    fn spawn_executor(&mut self, task: DownloadTask, signal: StopSignal) {
        let executor = self.executor.clone();
        let id = task.id;
        self.running.spawn(async move {
            let fallback = (
                partial_len(&task.partial_path()),
                task.bytes_total,
                task.resume_token.clone(),
            );
            let handle = tokio::spawn(async move { executor.run(task, signal).await });
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => TransferReport {
                    outcome: TransferOutcome::Failed(TransferError::Internal(format!(
                        "executor crashed: {e}"
                    ))),
                    bytes_downloaded: fallback.0,
                    bytes_total: fallback.1,
                    resume_token: fallback.2,
                },
            };
            (id, report)
        });
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}
