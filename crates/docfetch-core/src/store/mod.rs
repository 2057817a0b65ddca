//! Persistent task store (SQLite via sqlx).
//!
//! Holds the authoritative record of every task, including progress and the
//! resume token, so work survives a restart.

mod db;
mod tasks;
mod types;


pub use db::{default_db_path, TaskStore};
pub use types::{SortField, TaskQuery};
