//! Configuration types for `cloudport.yaml`.
//!
//! Every section is optional; a missing file or an empty document yields
//! [`Config::default`], which talks to a local Docker daemon and keeps its
//! database in `cloudport.db` next to the working directory.

use super::parse_duration_string;
use crate::backend::BackendKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_PROVISION_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_CLEANUP_PATTERN: &str = "^(test|sim|simulation|demo)[-_]";

/// Root configuration structure for cloudport.yaml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub docker: DockerConfig,

    #[serde(default)]
    pub azure: AzureConfig,

    /// Tenants known to the platform. Only these are eligible for demo seeding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tenants: Vec<String>,

    #[serde(default)]
    pub demo: DemoConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("cloudport.db")
}

/// Backend call deadlines, as duration strings ("60s", "10m").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimeoutConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Deadline for creating a container, which on cloud backends includes
    /// image pull and revision rollout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision: Option<String>,
}

impl TimeoutConfig {
    pub fn backend_timeout(&self) -> Duration {
        self.backend
            .as_deref()
            .and_then(parse_duration_string)
            .unwrap_or(DEFAULT_BACKEND_TIMEOUT)
    }

    pub fn provision_timeout(&self) -> Duration {
        self.provision
            .as_deref()
            .and_then(parse_duration_string)
            .unwrap_or(DEFAULT_PROVISION_TIMEOUT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Upper bound on concurrently running CLI subprocesses.
    #[serde(default = "default_max_concurrent_cli")]
    pub max_concurrent_cli: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_cli: default_max_concurrent_cli(),
        }
    }
}

fn default_max_concurrent_cli() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Path to the engine's unix socket. Uses the platform default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<String>,

    /// Host name used when building container URLs from published ports.
    #[serde(default = "default_public_host")]
    pub public_host: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            public_host: default_public_host(),
        }
    }
}

fn default_public_host() -> String {
    "localhost".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    #[serde(default = "default_az_cli")]
    pub cli: String,

    #[serde(default)]
    pub resource_group: String,

    /// Container Apps environment the apps are created in. Apps take the
    /// environment's region.
    #[serde(default)]
    pub environment: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_server: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_username: Option<String>,

    /// Name of the environment variable holding the registry password.
    /// The password itself never appears in the config file.
    #[serde(default = "default_password_env")]
    pub registry_password_env: String,

    #[serde(default = "default_cpu")]
    pub cpu: String,

    #[serde(default = "default_memory")]
    pub memory: String,

    #[serde(default)]
    pub min_replicas: u32,

    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,

    #[serde(default = "default_target_port")]
    pub target_port: u16,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            cli: default_az_cli(),
            resource_group: String::new(),
            environment: String::new(),
            registry_server: None,
            registry_username: None,
            registry_password_env: default_password_env(),
            cpu: default_cpu(),
            memory: default_memory(),
            min_replicas: 0,
            max_replicas: default_max_replicas(),
            target_port: default_target_port(),
        }
    }
}

fn default_az_cli() -> String {
    "az".to_string()
}

fn default_password_env() -> String {
    "AZURE_REGISTRY_PASSWORD".to_string()
}

fn default_cpu() -> String {
    "0.25".to_string()
}

fn default_memory() -> String {
    "0.5Gi".to_string()
}

fn default_max_replicas() -> u32 {
    1
}

fn default_target_port() -> u16 {
    80
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DemoConfig {
    /// Seed sample containers the first time a known tenant lists an empty set.
    #[serde(default)]
    pub seed_on_empty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Regex matched against container names by `cleanup`.
    #[serde(default = "default_cleanup_pattern")]
    pub pattern: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            pattern: default_cleanup_pattern(),
        }
    }
}

fn default_cleanup_pattern() -> String {
    DEFAULT_CLEANUP_PATTERN.to_string()
}

impl Config {
    pub fn is_known_tenant(&self, tenant: &str) -> bool {
        self.tenants.iter().any(|t| t == tenant)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("timeouts.backend", &self.timeouts.backend),
            ("timeouts.provision", &self.timeouts.provision),
        ] {
            if let Some(v) = value {
                if parse_duration_string(v).is_none() {
                    return Err(Error::Config(format!(
                        "{} has invalid duration '{}'. Use formats like '30s', '10m', '500ms'",
                        field, v
                    )));
                }
            }
        }

        if self.limits.max_concurrent_cli == 0 {
            return Err(Error::Config(
                "limits.max_concurrent_cli must be at least 1".to_string(),
            ));
        }

        if let Err(e) = regex::Regex::new(&self.cleanup.pattern) {
            return Err(Error::Config(format!(
                "cleanup.pattern is not a valid regex: {}",
                e
            )));
        }

        if self.docker.public_host.trim().is_empty() {
            return Err(Error::Config("docker.public_host must not be empty".to_string()));
        }

        for tenant in &self.tenants {
            if tenant.is_empty()
                || !tenant
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            {
                return Err(Error::Config(format!("invalid tenant id '{}'", tenant)));
            }
        }

        if self.backend == BackendKind::Azure {
            self.validate_azure()?;
        }

        Ok(())
    }

    fn validate_azure(&self) -> Result<()> {
        let azure = &self.azure;
        if azure.resource_group.trim().is_empty() {
            return Err(Error::Config(
                "azure.resource_group is required for the azure backend".to_string(),
            ));
        }
        if azure.environment.trim().is_empty() {
            return Err(Error::Config(
                "azure.environment is required for the azure backend".to_string(),
            ));
        }
        if azure.min_replicas > azure.max_replicas {
            return Err(Error::Config(format!(
                "azure.min_replicas ({}) exceeds azure.max_replicas ({})",
                azure.min_replicas, azure.max_replicas
            )));
        }
        if azure.registry_username.is_some() && azure.registry_server.is_none() {
            return Err(Error::Config(
                "azure.registry_username requires azure.registry_server".to_string(),
            ));
        }
        Ok(())
    }
}
