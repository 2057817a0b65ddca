//! Messages from `DownloadManager` handles to the scheduler task.

use tokio::sync::oneshot;

use super::manager::ManagerError;
use crate::task::{DownloadTask, EnqueueRequest, TaskId};

pub(super) type Reply<T> = oneshot::Sender<Result<T, ManagerError>>;

pub(super) enum Command {
    Enqueue {
        request: EnqueueRequest,
        reply: Reply<DownloadTask>,
    },
    Cancel {
        id: TaskId,
        reply: Reply<DownloadTask>,
    },
    Pause {
        id: TaskId,
        reply: Reply<DownloadTask>,
    },
    Resume {
        id: TaskId,
        reply: Reply<DownloadTask>,
    },
    Retry {
        id: TaskId,
        reply: Reply<DownloadTask>,
    },
    Remove {
        id: TaskId,
        delete_files: bool,
        reply: Reply<()>,
    },
    PauseQueue {
        reply: Reply<()>,
    },
    ResumeQueue {
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
