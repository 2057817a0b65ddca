//! `docfetch list` – show tasks.

use anyhow::Result;
use docfetch_core::store::{SortField, TaskQuery, TaskStore};
use docfetch_core::{DownloadTask, TaskStatus};

#[derive(Debug, Clone, Default)]
pub struct ListArgs {
    pub statuses: Vec<TaskStatus>,
    pub source: Option<String>,
    pub sort: SortField,
    pub desc: bool,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl ListArgs {
    fn query(self) -> TaskQuery {
        TaskQuery {
            statuses: self.statuses,
            source_id: self.source,
            sort: self.sort,
            descending: self.desc,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

pub(crate) fn format_progress(done: u64, total: Option<u64>) -> String {
    let mib = |b: u64| b as f64 / 1_048_576.0;
    match total {
        Some(total) if total > 0 => format!(
            "{:.1}/{:.1} MiB {:>3.0}%",
            mib(done),
            mib(total),
            done as f64 * 100.0 / total as f64
        ),
        _ => format!("{:.1} MiB", mib(done)),
    }
}

fn row(t: &DownloadTask) -> String {
    let mut line = format!(
        "{:<6} {:<10} {:>4} {:<10} {:<24} {}",
        t.id,
        t.status.as_str(),
        t.priority,
        t.source_id,
        format_progress(t.bytes_downloaded, t.bytes_total),
        t.url
    );
    if let Some(err) = &t.last_error {
        line.push_str(&format!("  [{err}]"));
    }
    line
}

pub async fn run_list(store: &TaskStore, args: ListArgs) -> Result<()> {
    let tasks = store.list(&args.query()).await?;
    if tasks.is_empty() {
        println!("No tasks.");
    } else {
        println!(
            "{:<6} {:<10} {:>4} {:<10} {:<24} {}",
            "ID", "STATUS", "PRI", "SOURCE", "PROGRESS", "URL"
        );
        for t in &tasks {
            println!("{}", row(t));
        }
    }
    Ok(())
}
