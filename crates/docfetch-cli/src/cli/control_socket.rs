//! Control socket: server (during `docfetch run`) and client (every other command).
//!
//! Protocol: one request line, one reply line.
//! Requests: `cancel <id>`, `pause <id>`, `resume <id>`, `retry <id>`,
//! `remove <id> [delete-files]`, `pause-queue`, `resume-queue`, `add <json>`.
//! Replies: `ok <text>` or `err <message>`.

use anyhow::{bail, Context, Result};
use docfetch_core::task::TaskId;
use docfetch_core::{DownloadManager, EnqueueRequest, ManagerError};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug, Clone)]
pub enum ControlRequest {
    Add(EnqueueRequest),
    Cancel(TaskId),
    Pause(TaskId),
    Resume(TaskId),
    Retry(TaskId),
    Remove { id: TaskId, delete_files: bool },
    PauseQueue,
    ResumeQueue,
}

impl ControlRequest {
    pub fn to_line(&self) -> Result<String> {
        Ok(match self {
            ControlRequest::Add(req) => format!("add {}", serde_json::to_string(req)?),
            ControlRequest::Cancel(id) => format!("cancel {id}"),
            ControlRequest::Pause(id) => format!("pause {id}"),
            ControlRequest::Resume(id) => format!("resume {id}"),
            ControlRequest::Retry(id) => format!("retry {id}"),
            ControlRequest::Remove { id, delete_files } => {
                if *delete_files {
                    format!("remove {id} delete-files")
                } else {
                    format!("remove {id}")
                }
            }
            ControlRequest::PauseQueue => "pause-queue".to_string(),
            ControlRequest::ResumeQueue => "resume-queue".to_string(),
        })
    }

    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let id = || -> Result<TaskId, String> {
            let first = rest.split_whitespace().next().unwrap_or("");
            first
                .parse::<TaskId>()
                .map_err(|_| format!("{cmd}: expected a task id, got {first:?}"))
        };
        match cmd {
            "add" => serde_json::from_str(rest)
                .map(ControlRequest::Add)
                .map_err(|e| format!("add: {e}")),
            "cancel" => id().map(ControlRequest::Cancel),
            "pause" => id().map(ControlRequest::Pause),
            "resume" => id().map(ControlRequest::Resume),
            "retry" => id().map(ControlRequest::Retry),
            "remove" => Ok(ControlRequest::Remove {
                id: id()?,
                delete_files: rest.split_whitespace().nth(1) == Some("delete-files"),
            }),
            "pause-queue" => Ok(ControlRequest::PauseQueue),
            "resume-queue" => Ok(ControlRequest::ResumeQueue),
            other => Err(format!("unknown command: {other:?}")),
        }
    }

    /// Dispatch-state requests only mean something to a running scheduler.
    pub fn needs_running_scheduler(&self) -> bool {
        matches!(self, ControlRequest::PauseQueue | ControlRequest::ResumeQueue)
    }
}

/// Apply one request to a manager. Returns the text after `ok `.
pub async fn apply(manager: &DownloadManager, request: ControlRequest) -> Result<String, ManagerError> {
    let task = match request {
        ControlRequest::Add(req) => {
            let task = manager.enqueue(req).await?;
            return Ok(format!(
                "{} {} {}",
                task.id,
                task.status,
                task.destination_path.display()
            ));
        }
        ControlRequest::Cancel(id) => manager.cancel(id).await?,
        ControlRequest::Pause(id) => manager.pause(id).await?,
        ControlRequest::Resume(id) => manager.resume(id).await?,
        ControlRequest::Retry(id) => manager.retry(id).await?,
        ControlRequest::Remove { id, delete_files } => {
            manager.remove(id, delete_files).await?;
            return Ok(format!("{id} removed"));
        }
        ControlRequest::PauseQueue => {
            manager.pause_queue().await?;
            return Ok("dispatch paused".to_string());
        }
        ControlRequest::ResumeQueue => {
            manager.resume_queue().await?;
            return Ok("dispatch resumed".to_string());
        }
    };
    Ok(format!("{} {}", task.id, task.status))
}

async fn serve_connection(manager: DownloadManager, stream: UnixStream) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match ControlRequest::parse(&line) {
            Ok(request) => match apply(&manager, request).await {
                Ok(text) => format!("ok {text}\n"),
                Err(e) => format!("err {e}\n"),
            },
            Err(e) => format!("err {e}\n"),
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Spawns a task that listens on `path` and applies each request line to `manager`.
/// A stale socket file from an earlier run is replaced.
pub fn spawn_control_listener(
    manager: DownloadManager,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind control socket {}", path.display()))?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(serve_connection(manager.clone(), stream));
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Removes the socket file when the running scheduler exits.
pub struct SocketGuard(pub PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Sends `request` to a running scheduler. `Ok(None)` when nothing is listening.
pub async fn send(socket_path: &Path, request: &ControlRequest) -> Result<Option<String>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let mut stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if matches!(e.kind(), io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound) => {
            tracing::debug!(path = %socket_path.display(), "stale control socket");
            return Ok(None);
        }
        Err(e) => return Err(e).context("connect to control socket"),
    };
    let line = request.to_line()? + "\n";
    stream.write_all(line.as_bytes()).await?;
    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply).await?;
    let reply = reply.trim_end();
    if let Some(text) = reply.strip_prefix("ok ") {
        return Ok(Some(text.to_string()));
    }
    match reply.strip_prefix("err ") {
        Some(msg) => bail!("{msg}"),
        None => bail!("malformed reply from control socket: {reply:?}"),
    }
}
