//! CLI for the docfetch download manager.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docfetch_core::config;
use docfetch_core::store::{SortField, TaskStore};
use docfetch_core::TaskStatus;
use std::path::PathBuf;

use commands::{run_add, run_control, run_list, run_manager, ListArgs};
use control_socket::ControlRequest;

/// Top-level CLI for the docfetch download manager.
#[derive(Debug, Parser)]
#[command(name = "docfetch")]
#[command(about = "docfetch: prioritized, rate-limited, resumable document downloads", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Enqueue a document.
    Add {
        /// Direct HTTP/HTTPS URL of the document.
        url: String,
        /// Source id (rate limits, headers, credentials). Defaults to the URL host.
        #[arg(long, value_name = "ID")]
        source: Option<String>,
        /// Higher starts first.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i64,
        /// Destination file. Defaults to <library_dir>/<source>/<name-from-url>.
        #[arg(long, value_name = "PATH")]
        dest: Option<PathBuf>,
    },

    /// Run the scheduler until the queue is drained.
    Run {
        /// Keep running after the queue drains; stop with Ctrl-C.
        #[arg(long)]
        watch: bool,
    },

    /// List tasks.
    List {
        /// Only tasks in this status (repeatable).
        #[arg(long = "status", value_name = "STATUS")]
        statuses: Vec<TaskStatus>,
        /// Only tasks from this source.
        #[arg(long, value_name = "ID")]
        source: Option<String>,
        /// id, created, updated, priority or bytes.
        #[arg(long, default_value = "id", value_name = "FIELD")]
        sort: SortField,
        /// Sort descending.
        #[arg(long)]
        desc: bool,
        #[arg(long, value_name = "N")]
        limit: Option<u64>,
        #[arg(long, default_value_t = 0, value_name = "N")]
        offset: u64,
    },

    /// Cancel a task; an active transfer stops and keeps its partial file.
    Cancel {
        /// Task identifier.
        id: i64,
    },

    /// Re-queue a failed, paused or cancelled task with a fresh attempt budget.
    Retry {
        /// Task identifier.
        id: i64,
    },

    /// Pause a queued or active task.
    Pause {
        /// Task identifier.
        id: i64,
    },

    /// Resume a paused task.
    Resume {
        /// Task identifier.
        id: i64,
    },

    /// Remove a task record (and optionally its files).
    Remove {
        /// Task identifier.
        id: i64,
        /// Also delete the destination and partial files.
        #[arg(long)]
        delete_files: bool,
    },

    /// Stop starting new transfers in the running scheduler.
    PauseQueue,

    /// Start dispatching again.
    ResumeQueue,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let store = TaskStore::open_default().await?;

        match cli.command {
            CliCommand::Add {
                url,
                source,
                priority,
                dest,
            } => run_add(&cfg, store, url, source, priority, dest).await?,
            CliCommand::Run { watch } => run_manager(&cfg, store, watch).await?,
            CliCommand::List {
                statuses,
                source,
                sort,
                desc,
                limit,
                offset,
            } => {
                let args = ListArgs {
                    statuses,
                    source,
                    sort,
                    desc,
                    limit,
                    offset,
                };
                run_list(&store, args).await?
            }
            CliCommand::Cancel { id } => run_control(&cfg, store, ControlRequest::Cancel(id)).await?,
            CliCommand::Retry { id } => run_control(&cfg, store, ControlRequest::Retry(id)).await?,
            CliCommand::Pause { id } => run_control(&cfg, store, ControlRequest::Pause(id)).await?,
            CliCommand::Resume { id } => run_control(&cfg, store, ControlRequest::Resume(id)).await?,
            CliCommand::Remove { id, delete_files } => {
                run_control(&cfg, store, ControlRequest::Remove { id, delete_files }).await?
            }
            CliCommand::PauseQueue => run_control(&cfg, store, ControlRequest::PauseQueue).await?,
            CliCommand::ResumeQueue => run_control(&cfg, store, ControlRequest::ResumeQueue).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
