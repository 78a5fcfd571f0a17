use super::Orchestrator;
use crate::backend::{self, ContainerBackend};
use crate::config::Config;
use crate::error::Result;
use crate::state::Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Builder for constructing an `Orchestrator` with a fluent API.
///
/// Anything not set explicitly comes from the configuration: the backend
/// from `backend`, the database from `database.path`, deadlines from
/// `timeouts`. The store is always initialized before `build` returns.
///
/// # Example
///
/// ```no_run
/// use cloudport::{Config, Orchestrator};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), cloudport::Error> {
/// let orchestrator = Orchestrator::builder()
///     .config(Config::default())
///     .database_path("/var/lib/cloudport/cloudport.db")
///     .backend_timeout(Duration::from_secs(30))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct OrchestratorBuilder {
    config: Option<Config>,
    backend: Option<Arc<dyn ContainerBackend>>,
    store: Option<Store>,
    database_path: Option<PathBuf>,
    in_memory: bool,
    backend_timeout: Option<Duration>,
    provision_timeout: Option<Duration>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            backend: None,
            store: None,
            database_path: None,
            in_memory: false,
            backend_timeout: None,
            provision_timeout: None,
        }
    }

    /// Set the configuration. Defaults to [`Config::default`].
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this backend instead of connecting to the configured one.
    pub fn backend(mut self, backend: Arc<dyn ContainerBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use an already opened store.
    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Override `database.path`.
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Keep state in memory only. Useful for tests and dry runs.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }

    pub fn provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout = Some(timeout);
        self
    }

    /// Open the store, connect the backend and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the configuration does not validate
    /// - the database cannot be opened or has a newer schema
    /// - the configured backend cannot be set up
    pub async fn build(self) -> Result<Orchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None if self.in_memory => Store::open_in_memory().await?,
            None => {
                let path = self
                    .database_path
                    .unwrap_or_else(|| config.database.path.clone());
                Store::open(path).await?
            }
        };
        store.initialize().await?;

        let backend = match self.backend {
            Some(backend) => backend,
            None => backend::connect(&config)?,
        };

        let backend_timeout = self
            .backend_timeout
            .unwrap_or_else(|| config.timeouts.backend_timeout());
        let provision_timeout = self
            .provision_timeout
            .unwrap_or_else(|| config.timeouts.provision_timeout());

        tracing::debug!(
            "Orchestrator using {} backend, database {}",
            backend.kind(),
            store.path().display()
        );
        Orchestrator::new(config, store, backend, backend_timeout, provision_timeout)
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, SimulatedBackend};

    #[tokio::test]
    async fn test_builder_uses_injected_backend() {
        let orchestrator = OrchestratorBuilder::new()
            .backend(Arc::new(SimulatedBackend::new()))
            .in_memory()
            .build()
            .await
            .expect("builder failed");
        assert_eq!(orchestrator.backend().kind(), BackendKind::Simulated);
        assert_eq!(orchestrator.backend_timeout, Duration::from_secs(60));
        assert_eq!(orchestrator.provision_timeout, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_builder_timeouts_override_config() {
        let orchestrator = OrchestratorBuilder::new()
            .backend(Arc::new(SimulatedBackend::new()))
            .in_memory()
            .backend_timeout(Duration::from_secs(5))
            .build()
            .await
            .expect("builder failed");
        assert_eq!(orchestrator.backend_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_builder_creates_database_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("state").join("cloudport.db");
        OrchestratorBuilder::new()
            .backend(Arc::new(SimulatedBackend::new()))
            .database_path(&path)
            .build()
            .await
            .expect("builder failed");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_config() {
        let mut config = Config::default();
        config.cleanup.pattern = "([unclosed".to_string();
        let result = OrchestratorBuilder::new()
            .config(config)
            .backend(Arc::new(SimulatedBackend::new()))
            .in_memory()
            .build()
            .await;
        assert!(result.is_err());
    }
}
