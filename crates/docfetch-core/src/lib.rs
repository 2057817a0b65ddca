//! Document download manager: prioritized, rate-limited, resumable transfers
//! with durable state and live progress events.

pub mod config;
pub mod control;
pub mod events;
pub mod logging;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod task;
pub mod transfer;
pub mod url_model;

pub use config::DocfetchConfig;
pub use events::{EventStream, ProgressEvent};
pub use scheduler::{DownloadManager, ManagerError};
pub use store::{SortField, TaskQuery, TaskStore};
pub use task::{DownloadTask, EnqueueRequest, TaskId, TaskStatus};
