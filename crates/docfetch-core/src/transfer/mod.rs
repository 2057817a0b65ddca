//! Transfer executor: one attempt at moving a document from its URL into
//! `<destination>.part`, then atomically onto the destination.
//!
//! The HTTP work runs on a blocking thread with libcurl; progress samples flow
//! back over a channel to an async loop that updates the store and publishes
//! events. The attempt can be stopped between chunks through its
//! [`StopSignal`](crate::control::StopSignal).

mod head;
mod partial;
mod progress;
mod run;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::DocfetchConfig;
use crate::control::{StopReason, StopSignal};
use crate::events::Broadcaster;
use crate::retry::TransferError;
use crate::source::{CredentialProvider, SourceRegistry};
use crate::store::TaskStore;
use crate::task::DownloadTask;

pub use partial::{discard as discard_partial, existing_len as partial_len, partial_path, PARTIAL_SUFFIX};

/// Executor tuning, usually taken from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// curl receive buffer size (bytes per write callback).
    pub chunk_size: usize,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub progress_bytes_threshold: u64,
    pub progress_interval: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self::from_config(&DocfetchConfig::default())
    }
}

impl TransferOptions {
    pub fn from_config(cfg: &DocfetchConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            timeout: Duration::from_secs(cfg.timeout_secs),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            progress_bytes_threshold: cfg.progress_bytes_threshold,
            progress_interval: cfg.progress_interval(),
        }
    }
}

/// How an attempt ended.
#[derive(Debug)]
pub enum TransferOutcome {
    /// Destination file is in place.
    Completed,
    /// Stop signal honoured; the partial file is kept.
    Stopped(StopReason),
    Failed(TransferError),
}

/// Result of one attempt, with the byte counters and validator to persist.
#[derive(Debug)]
pub struct TransferReport {
    pub outcome: TransferOutcome,
    /// Bytes on disk for this task after the attempt.
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
    pub resume_token: Option<String>,
}

impl TransferReport {
    /// Report for an attempt that ended before touching the partial file.
    pub(crate) fn untouched(task: &DownloadTask, outcome: TransferOutcome) -> Self {
        Self {
            outcome,
            bytes_downloaded: partial_len(&task.partial_path()),
            bytes_total: task.bytes_total,
            resume_token: task.resume_token.clone(),
        }
    }
}

/// Everything an attempt needs besides the task itself. Cheap to clone.
#[derive(Clone)]
pub struct Executor {
    store: TaskStore,
    events: Broadcaster,
    sources: SourceRegistry,
    credentials: Arc<dyn CredentialProvider>,
    options: TransferOptions,
}

impl Executor {
    pub fn new(
        store: TaskStore,
        events: Broadcaster,
        sources: SourceRegistry,
        credentials: Arc<dyn CredentialProvider>,
        options: TransferOptions,
    ) -> Self {
        Self {
            store,
            events,
            sources,
            credentials,
            options,
        }
    }

    /// Run one attempt for an Active task.
    pub async fn run(&self, task: DownloadTask, stop: StopSignal) -> TransferReport {
        if let Some(reason) = stop.reason() {
            return TransferReport::untouched(&task, TransferOutcome::Stopped(reason));
        }

        let adapter = self.sources.get(&task.source_id);
        let credentials = self.credentials.credentials(&task.source_id);
        let request = match adapter.build_request(&task, credentials.as_ref()) {
            Ok(request) => request,
            Err(e) => return TransferReport::untouched(&task, TransferOutcome::Failed(e)),
        };

        let (progress_tx, progress_rx) = mpsc::channel(64);
        let progress_handle = tokio::spawn(progress::run_progress_loop(
            progress_rx,
            self.store.clone(),
            self.events.clone(),
            task.id,
        ));

        let job = run::BlockingJob {
            request,
            adapter,
            partial: task.partial_path(),
            destination: task.destination_path.clone(),
            resume_token: task.resume_token.clone(),
            known_total: task.bytes_total,
            options: self.options,
            stop,
            progress: progress_tx,
        };

        tracing::debug!(task_id = task.id, url = %task.url, "transfer starting");
        let report = match tokio::task::spawn_blocking(move || run::download(job)).await {
            Ok(report) => report,
            Err(e) => TransferReport::untouched(
                &task,
                TransferOutcome::Failed(TransferError::Internal(format!(
                    "transfer thread failed: {e}"
                ))),
            ),
        };

        if let Err(e) = progress_handle.await {
            tracing::warn!(task_id = task.id, error = %e, "progress loop failed");
        }
        report
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("sources", &self.sources)
            .field("options", &self.options)
            .finish()
    }
}
