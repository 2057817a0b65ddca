//! Task and queue control: through the running scheduler when there is one,
//! otherwise against the store with a manager that never dispatches.

use anyhow::{bail, Result};
use docfetch_core::config::DocfetchConfig;
use docfetch_core::control::default_control_socket_path;
use docfetch_core::{DownloadManager, TaskStore};

use crate::cli::control_socket::{self, ControlRequest};

pub async fn run_control(cfg: &DocfetchConfig, store: TaskStore, request: ControlRequest) -> Result<()> {
    if let Ok(path) = default_control_socket_path() {
        if let Some(reply) = control_socket::send(&path, &request).await? {
            println!("{reply}");
            return Ok(());
        }
    }
    if request.needs_running_scheduler() {
        bail!("no `docfetch run` is active");
    }

    let manager = DownloadManager::builder(cfg.clone(), store)
        .start_paused(true)
        .start()
        .await?;
    let result = control_socket::apply(&manager, request).await;
    manager.shutdown().await?;
    println!("{}", result?);
    Ok(())
}
