mod admin;
mod create;
mod lifecycle;
mod list;
mod logs;

pub use admin::{run_activity, run_cleanup};
pub use create::{run_create, run_predefined, CreateArgs};
pub use lifecycle::run_lifecycle;
pub use list::{run_list, run_show};
pub use logs::{run_logs, run_stats};

use cloudport::Status;

/// One-character marker used in tables.
fn status_icon(status: Status) -> &'static str {
    match status {
        Status::Running => "+",
        Status::Created | Status::Stopped => "o",
        Status::Error => "x",
        Status::Creating | Status::Starting | Status::Stopping | Status::Removing => ".",
    }
}
