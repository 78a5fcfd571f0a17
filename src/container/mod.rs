//! Domain types for managed containers.
//!
//! - [`Status`]: canonical lifecycle status shared by every backend
//! - [`ManagedContainer`]: the persisted row
//! - [`ContainerSpec`]: a create request
//! - [`LiveContainer`] / [`ContainerStats`]: what a backend reports
//! - [`Caller`]: who is asking, for tenant isolation
//! - [`templates`]: predefined per-service-type specs

mod status;
pub mod templates;
mod types;

pub use status::Status;
pub use templates::predefined_spec;
pub use types::*;
