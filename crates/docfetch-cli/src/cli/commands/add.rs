//! `docfetch add <url>` – enqueue a document.

use anyhow::{Context, Result};
use docfetch_core::config::DocfetchConfig;
use docfetch_core::url_model::default_destination;
use docfetch_core::{EnqueueRequest, TaskStore};
use std::path::PathBuf;

use super::run_control;
use crate::cli::control_socket::ControlRequest;

pub async fn run_add(
    cfg: &DocfetchConfig,
    store: TaskStore,
    url: String,
    source: Option<String>,
    priority: i64,
    dest: Option<PathBuf>,
) -> Result<()> {
    let source = match source {
        Some(s) => s,
        None => source_from_url(&url)?,
    };
    let cwd = std::env::current_dir()?;
    let dest = match dest {
        // The scheduler may run from another directory.
        Some(d) if d.is_relative() => cwd.join(d),
        Some(d) => d,
        None => {
            let library = cfg.library_dir.clone().unwrap_or(cwd);
            default_destination(&library, &source, &url)
        }
    };
    let request = EnqueueRequest::new(url, source, dest).with_priority(priority);
    run_control(cfg, store, ControlRequest::Add(request)).await
}

/// Host without a leading `www.`, lowercased.
pub(crate) fn source_from_url(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url.trim()).with_context(|| format!("invalid url: {url}"))?;
    let host = parsed.host_str().context("url has no host")?;
    Ok(host.trim_start_matches("www.").to_ascii_lowercase())
}
