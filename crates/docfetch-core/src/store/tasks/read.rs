//! Task read operations: get, load and list.

use anyhow::Result;
use sqlx::{QueryBuilder, Sqlite};

use super::{task_from_row, COLUMNS};
use crate::store::db::TaskStore;
use crate::store::types::TaskQuery;
use crate::task::{DownloadTask, TaskId};

impl TaskStore {
    pub async fn get(&self, id: TaskId) -> Result<Option<DownloadTask>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// Every task, oldest first. Used at startup to rebuild the queue.
    pub async fn load_all(&self) -> Result<Vec<DownloadTask>> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM tasks ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Filtered, sorted, paginated listing.
    pub async fn list(&self, query: &TaskQuery) -> Result<Vec<DownloadTask>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM tasks WHERE 1 = 1"));

        if !query.statuses.is_empty() {
            qb.push(" AND status IN (");
            let mut sep = qb.separated(", ");
            for status in &query.statuses {
                sep.push_bind(status.as_str());
            }
            sep.push_unseparated(")");
        }
        if let Some(source) = &query.source_id {
            qb.push(" AND source_id = ").push_bind(source.clone());
        }

        let dir = if query.descending { "DESC" } else { "ASC" };
        qb.push(format!(
            " ORDER BY {} {dir}, id {dir}",
            query.sort.column()
        ));

        match query.limit {
            Some(limit) => {
                qb.push(" LIMIT ").push_bind(limit.min(i64::MAX as u64) as i64);
            }
            None if query.offset > 0 => {
                qb.push(" LIMIT -1");
            }
            None => {}
        }
        if query.offset > 0 {
            qb.push(" OFFSET ")
                .push_bind(query.offset.min(i64::MAX as u64) as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }
}
