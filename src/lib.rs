//! # cloudport
//!
//! Multi-tenant container lifecycle management over interchangeable runtimes.
//!
//! ## Features
//!
//! - **Backends**: a local Docker engine, Azure Container Apps (through the
//!   `az` CLI), or an in-memory simulation, chosen explicitly in config
//! - **Persistence**: container rows and an activity log in SQLite
//! - **Reconciliation**: listings merge stored rows with live backend state
//!   and write observed status changes back
//! - **Tenant isolation**: clients only ever see and act on their own tenant
//! - **Serialized transitions**: one lifecycle operation per container at a
//!   time, each bounded by a deadline
//!
//! ## Quick Start
//!
//! ```no_run
//! use cloudport::container::Caller;
//! use cloudport::{Orchestrator, Parser};
//!
//! # async fn example() -> Result<(), cloudport::Error> {
//! let config = Parser::new().resolve(None)?;
//! let orchestrator = Orchestrator::builder().config(config).build().await?;
//!
//! let caller = Caller::client("alice", "acme");
//! for container in orchestrator.list(&caller, None, false).await? {
//!     println!("{} {}", container.id, container.status);
//! }
//!
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - Every operation takes `&self`; the orchestrator can be shared freely
//! - A keyed mutex serializes operations on the same container
//! - Backend calls are bounded by `timeouts.backend` / `timeouts.provision`
//! - Background provisioning is tracked and cancelled on shutdown

pub mod backend;
pub mod config;
pub mod container;
pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod reconcile;
pub mod state;

// Re-export commonly used types
pub use backend::{BackendKind, ContainerBackend};
pub use config::{Config, Parser};
pub use container::{Caller, ContainerSpec, ManagedContainer, ServiceType, Status};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use reconcile::{map_runtime_status, ContainerView};
pub use state::Store;
