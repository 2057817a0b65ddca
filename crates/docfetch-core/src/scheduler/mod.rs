//! Scheduler and dispatcher.
//!
//! A single tokio task owns the queue, the rate limiter, the registry of
//! active transfers and the join set of running executors. The cloneable
//! [`DownloadManager`] handle sends it commands; every state transition is
//! written to the store first, then reflected in the queue, then published.

mod actor;
mod command;
mod manager;
mod outcome;
mod transitions;


pub use manager::{DownloadManager, ManagerBuilder, ManagerError};
