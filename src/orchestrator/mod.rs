mod builder;
mod cleanup;
mod core;
mod provision;

pub use builder::OrchestratorBuilder;
pub use cleanup::CleanupReport;
pub use self::core::*;
