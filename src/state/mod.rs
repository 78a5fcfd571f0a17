//! Persistent state for containers and the activity log.
//!
//! State lives in a SQLite database (`cloudport.db` by default) with WAL mode
//! enabled, so listings from one process see writes made by another.
//!
//! # Example
//!
//! ```ignore
//! use cloudport::state::{ContainerRepository, Store};
//!
//! let store = Store::open("cloudport.db").await?;
//! store.initialize().await?;
//!
//! let containers = ContainerRepository::new(store.clone());
//! let rows = containers.list(Some("acme")).await?;
//! ```

mod activity;
mod containers;
mod sqlite;

pub use containers::ContainerRepository;
pub use sqlite::{Record, Store, Table};
