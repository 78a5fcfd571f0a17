//! Container runtime backends.
//!
//! [`ContainerBackend`] is the single seam between the lifecycle core and
//! whatever actually runs containers. Three implementations exist:
//!
//! - [`DockerBackend`]: a local Docker engine over its unix socket
//! - [`AzureBackend`]: Azure Container Apps through the `az` CLI
//! - [`SimulatedBackend`]: in-memory, for demos and tests
//!
//! Which one is used is an explicit configuration choice ([`BackendKind`]).

pub mod azure;
pub mod cli;
pub mod docker;
pub mod metrics;
pub mod simulated;

pub use azure::AzureBackend;
pub use cli::{CliError, CliRunner};
pub use docker::DockerBackend;
pub use simulated::SimulatedBackend;

use crate::config::Config;
use crate::container::{ContainerStats, LiveContainer, ManagedContainer};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Label carrying the owning tenant on Docker containers.
pub const TENANT_LABEL: &str = "cloudport.tenant";
/// Tenant label written by earlier deployments; still honored on read.
pub const LEGACY_TENANT_LABEL: &str = "clientId";
/// Label carrying the platform id of the row a container belongs to.
pub const PLATFORM_ID_LABEL: &str = "cloudport.id";
pub const SERVICE_TYPE_LABEL: &str = "cloudport.service-type";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Docker,
    Azure,
    Simulated,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Docker => "docker",
            BackendKind::Azure => "azure",
            BackendKind::Simulated => "simulated",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "docker" | "local" => Ok(BackendKind::Docker),
            "azure" | "cloud" => Ok(BackendKind::Azure),
            "simulated" | "simulation" => Ok(BackendKind::Simulated),
            other => Err(Error::Validation(format!("unknown backend '{}'", other))),
        }
    }
}

/// What a successful `create` hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub runtime_id: String,
    pub url: Option<String>,
}

/// Uniform lifecycle operations over a container runtime.
///
/// `container` arguments are runtime references: the backend's own id once
/// known, or the platform id, which every backend also uses as the runtime
/// name. Implementations never retry.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// True when `create` returns before the workload is actually reachable,
    /// so the caller should finish provisioning in the background.
    fn provisions_async(&self) -> bool {
        false
    }

    /// Live containers, optionally only those labelled with `tenant`.
    async fn list(&self, tenant: Option<&str>, with_metrics: bool) -> Result<Vec<LiveContainer>>;

    async fn create(&self, container: &ManagedContainer) -> Result<Provisioned>;

    async fn start(&self, container: &str) -> Result<()>;

    async fn stop(&self, container: &str) -> Result<()>;

    async fn restart(&self, container: &str) -> Result<()> {
        self.stop(container).await?;
        self.start(container).await
    }

    async fn remove(&self, container: &str) -> Result<()>;

    async fn logs(&self, container: &str, tail: usize) -> Result<Vec<String>>;

    async fn stats(&self, container: &str) -> Result<ContainerStats>;
}

/// Build the backend selected in `config`.
pub fn connect(config: &Config) -> Result<Arc<dyn ContainerBackend>> {
    let backend: Arc<dyn ContainerBackend> = match config.backend {
        BackendKind::Docker => Arc::new(DockerBackend::connect(&config.docker)?),
        BackendKind::Azure => Arc::new(AzureBackend::new(
            config.azure.clone(),
            config.limits.max_concurrent_cli,
            config.timeouts.backend_timeout(),
            config.timeouts.provision_timeout(),
        )),
        BackendKind::Simulated => Arc::new(SimulatedBackend::new()),
    };
    tracing::debug!("Using {} backend", backend.kind());
    Ok(backend)
}

/// Owning tenant recorded in runtime labels, if any.
pub fn tenant_from_labels(labels: &BTreeMap<String, String>) -> Option<String> {
    labels
        .get(TENANT_LABEL)
        .or_else(|| labels.get(LEGACY_TENANT_LABEL))
        .filter(|t| !t.is_empty())
        .cloned()
}

/// Labels every backend attaches to a container it creates.
pub fn platform_labels(container: &ManagedContainer) -> BTreeMap<String, String> {
    let mut labels = container.labels.clone();
    labels.insert(TENANT_LABEL.to_string(), container.tenant_id.clone());
    labels.insert(PLATFORM_ID_LABEL.to_string(), container.id.clone());
    labels.insert(
        SERVICE_TYPE_LABEL.to_string(),
        container.service_type.as_str().to_string(),
    );
    labels
}
