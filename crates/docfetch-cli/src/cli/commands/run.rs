//! `docfetch run` – run the scheduler, serve the control socket and print progress.

use anyhow::Result;
use docfetch_core::config::DocfetchConfig;
use docfetch_core::control::default_control_socket_path;
use docfetch_core::store::TaskQuery;
use docfetch_core::{DownloadManager, EventStream, TaskStatus, TaskStore};

use super::list::format_progress;
use crate::cli::control_socket::{self, SocketGuard};

async fn print_events(mut events: EventStream) {
    while let Some(e) = events.recv().await {
        let progress = format_progress(e.bytes_downloaded, e.bytes_total);
        match &e.error {
            Some(err) if e.status != TaskStatus::Active => {
                println!("  [{}] {:<9} {}  {}", e.task_id, e.status.as_str(), progress, err)
            }
            _ => println!("  [{}] {:<9} {}", e.task_id, e.status.as_str(), progress),
        }
    }
}

pub async fn run_manager(cfg: &DocfetchConfig, store: TaskStore, watch: bool) -> Result<()> {
    let manager = DownloadManager::builder(cfg.clone(), store).start().await?;

    let socket = match default_control_socket_path() {
        Ok(path) => match control_socket::spawn_control_listener(manager.clone(), &path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some((handle, SocketGuard(path)))
            }
            Err(e) => {
                tracing::warn!("control socket unavailable: {:#}", e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("control socket path: {}", e);
            None
        }
    };

    let printer = tokio::spawn(print_events(manager.subscribe()));

    if watch {
        tokio::signal::ctrl_c().await?;
        println!("Stopping; active transfers go back to the queue.");
    } else {
        tokio::select! {
            _ = manager.wait_idle() => {}
            r = tokio::signal::ctrl_c() => {
                r?;
                println!("Interrupted; active transfers go back to the queue.");
            }
        }
    }

    if let Some((handle, _)) = &socket {
        handle.abort();
    }
    manager.shutdown().await?;
    let _ = printer.await;
    drop(socket);

    let tasks = manager.store().list(&TaskQuery::default()).await?;
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    let summary: Vec<String> = TaskStatus::ALL
        .iter()
        .filter_map(|&status| {
            let n = tasks.iter().filter(|t| t.status == status).count();
            (n > 0).then(|| format!("{n} {status}"))
        })
        .collect();
    println!("{}", summary.join(", "));
    Ok(())
}
