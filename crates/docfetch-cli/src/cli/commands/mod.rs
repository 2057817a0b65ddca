//! CLI command handlers. Each command is in its own file.

mod add;
mod control;
mod list;
mod run;

pub use add::run_add;
pub use control::run_control;
pub use list::{run_list, ListArgs};
pub use run::run_manager;
