//! Public handle to the download manager.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use super::actor::{Load, Scheduler};
use super::command::{Command, Reply};
use crate::config::DocfetchConfig;
use crate::events::{Broadcaster, EventStream};
use crate::queue::TaskQueue;
use crate::rate_limit::RateLimiter;
use crate::source::{CredentialProvider, SourceRegistry, StaticCredentials};
use crate::store::{TaskQuery, TaskStore};
use crate::task::{DownloadTask, EnqueueRequest, TaskId, TaskStatus, ValidationError};
use crate::transfer::{Executor, TransferOptions};

/// Errors returned by manager operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("cannot {op} task {id}: it is {status}")]
    InvalidTransition {
        id: TaskId,
        status: TaskStatus,
        op: &'static str,
    },
    #[error("store: {0:#}")]
    Store(#[from] anyhow::Error),
    #[error("download manager is shut down")]
    ShutDown,
}

/// Configures and starts a [`DownloadManager`].
pub struct ManagerBuilder {
    config: DocfetchConfig,
    store: TaskStore,
    sources: Option<SourceRegistry>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    start_paused: bool,
}

impl ManagerBuilder {
    /// Override the per-source adapters (default: one `HttpSource` per `[sources.*]`).
    pub fn sources(mut self, sources: SourceRegistry) -> Self {
        self.sources = Some(sources);
        self
    }

    /// Override the credential provider (default: `[credentials.*]` from config).
    pub fn credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Start with dispatch suspended (`resume_queue` enables it).
    pub fn start_paused(mut self, paused: bool) -> Self {
        self.start_paused = paused;
        self
    }

    /// Recover the store, rebuild the queue and spawn the scheduler task.
    /// Must be called inside a tokio runtime.
    pub async fn start(self) -> anyhow::Result<DownloadManager> {
        let ManagerBuilder {
            config,
            store,
            sources,
            credentials,
            start_paused,
        } = self;
        config.validate()?;

        let recovered = store.recover_active().await?;
        if recovered > 0 {
            tracing::info!(recovered, "reset interrupted transfers to queued");
        }
        let mut queue = TaskQueue::new();
        for task in store.load_all().await? {
            if task.status == TaskStatus::Queued {
                queue.admit(
                    task.id,
                    &task.source_id,
                    &task.destination_path,
                    task.priority,
                    None,
                );
            }
        }
        tracing::info!(queued = queue.len(), "task queue rebuilt");

        let events = Broadcaster::new(config.event_buffer);
        let sources = sources.unwrap_or_else(|| SourceRegistry::from_config(&config));
        let credentials = credentials
            .unwrap_or_else(|| Arc::new(StaticCredentials::new(config.credentials.clone())));
        let executor = Executor::new(
            store.clone(),
            events.clone(),
            sources,
            Arc::clone(&credentials),
            TransferOptions::from_config(&config),
        );

        let (tx, rx) = mpsc::channel(64);
        let (load_tx, load_rx) = watch::channel(Load {
            queued: queue.len(),
            active: 0,
        });
        let scheduler = Scheduler::new(
            rx,
            store.clone(),
            events.clone(),
            queue,
            RateLimiter::from_config(&config),
            executor,
            credentials,
            config.retry_policy(),
            config.max_parallel,
            start_paused,
            load_tx,
        );
        tokio::spawn(scheduler.run());

        Ok(DownloadManager {
            tx,
            store,
            events,
            load: load_rx,
        })
    }
}

/// Cloneable handle. All clones drive the same scheduler task.
#[derive(Clone, Debug)]
pub struct DownloadManager {
    tx: mpsc::Sender<Command>,
    store: TaskStore,
    events: Broadcaster,
    load: watch::Receiver<Load>,
}

impl DownloadManager {
    pub fn builder(config: DocfetchConfig, store: TaskStore) -> ManagerBuilder {
        ManagerBuilder {
            config,
            store,
            sources: None,
            credentials: None,
            start_paused: false,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ManagerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ManagerError::ShutDown)?;
        rx.await.map_err(|_| ManagerError::ShutDown)?
    }

    /// Validate and enqueue. Invalid requests fail synchronously and create nothing.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<DownloadTask, ManagerError> {
        request.validate()?;
        self.request(|reply| Command::Enqueue { request, reply })
            .await
    }

    /// Cancel a task. Active tasks stop cooperatively; the reply carries the final state.
    /// Terminal tasks are returned unchanged.
    pub async fn cancel(&self, id: TaskId) -> Result<DownloadTask, ManagerError> {
        self.request(|reply| Command::Cancel { id, reply }).await
    }

    /// Take a Queued or Active task out of circulation, keeping its partial file.
    pub async fn pause(&self, id: TaskId) -> Result<DownloadTask, ManagerError> {
        self.request(|reply| Command::Pause { id, reply }).await
    }

    /// Paused → Queued, keeping the attempt count.
    pub async fn resume(&self, id: TaskId) -> Result<DownloadTask, ManagerError> {
        self.request(|reply| Command::Resume { id, reply }).await
    }

    /// Failed/Paused/Cancelled → Queued with a fresh attempt budget.
    pub async fn retry(&self, id: TaskId) -> Result<DownloadTask, ManagerError> {
        self.request(|reply| Command::Retry { id, reply }).await
    }

    /// Delete a task record (not while Active), optionally with its files.
    pub async fn remove(&self, id: TaskId, delete_files: bool) -> Result<(), ManagerError> {
        self.request(|reply| Command::Remove {
            id,
            delete_files,
            reply,
        })
        .await
    }

    /// Suspend dispatch. Running transfers continue.
    pub async fn pause_queue(&self) -> Result<(), ManagerError> {
        self.request(|reply| Command::PauseQueue { reply }).await
    }

    pub async fn resume_queue(&self) -> Result<(), ManagerError> {
        self.request(|reply| Command::ResumeQueue { reply }).await
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<DownloadTask>, ManagerError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list(&self, query: &TaskQuery) -> Result<Vec<DownloadTask>, ManagerError> {
        Ok(self.store.list(query).await?)
    }

    /// New independent event stream.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Resolves once nothing is Queued or Active (or the scheduler has exited).
    pub async fn wait_idle(&self) {
        let mut load = self.load.clone();
        let _ = load.wait_for(Load::is_idle).await;
    }

    /// Stop dispatching, stop active transfers (they go back to Queued with
    /// their partial files), wait for them and close every event stream.
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown { reply }).await.is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}
