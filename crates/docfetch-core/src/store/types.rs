//! Query types for listing tasks.

use crate::task::TaskStatus;

/// Column a listing is sorted by. Ties are broken by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Id,
    Created,
    Updated,
    Priority,
    BytesDownloaded,
}

impl SortField {
    pub(crate) fn column(self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::Created => "created_at",
            SortField::Updated => "updated_at",
            SortField::Priority => "priority",
            SortField::BytesDownloaded => "bytes_downloaded",
        }
    }
}

impl std::str::FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "id" => Ok(SortField::Id),
            "created" | "created_at" => Ok(SortField::Created),
            "updated" | "updated_at" => Ok(SortField::Updated),
            "priority" => Ok(SortField::Priority),
            "bytes" | "bytes_downloaded" => Ok(SortField::BytesDownloaded),
            other => Err(format!("unknown sort field: {other}")),
        }
    }
}

/// Filter, sort and page through tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    /// Empty means any status.
    pub statuses: Vec<TaskStatus>,
    pub source_id: Option<String>,
    pub sort: SortField,
    pub descending: bool,
    pub offset: u64,
    pub limit: Option<u64>,
}

impl TaskQuery {
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn sorted_by(mut self, sort: SortField, descending: bool) -> Self {
        self.sort = sort;
        self.descending = descending;
        self
    }

    pub fn page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}
