use super::Config;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_NAMES: [&str; 2] = ["cloudport.yaml", "cloudport.yml"];

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find config file starting from current directory
    pub fn find_config_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_config_in_dir(&current_dir)
    }

    pub fn find_config_in_dir(dir: &Path) -> Result<PathBuf> {
        for name in CONFIG_NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        if let Some(parent) = dir.parent() {
            return Self::find_config_in_dir(parent);
        }

        Err(Error::Config(
            "Could not find cloudport.yaml in current directory or any parent".to_string(),
        ))
    }

    /// Load config from file path
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let mut config = self.parse_config(&content)?;

        // Relative database paths are relative to the config file.
        if config.database.path.is_relative() {
            if let Some(dir) = path.as_ref().parent() {
                config.database.path = dir.join(&config.database.path);
            }
        }

        Ok(config)
    }

    /// Load an explicit file, or search upward from the current directory.
    ///
    /// When no explicit path is given and nothing is found, the defaults are
    /// used so that `cloudport` works without any setup.
    pub fn resolve(&self, explicit: Option<&Path>) -> Result<Config> {
        let config = match explicit {
            Some(path) => self.load_config(path)?,
            None => match self.find_config_file() {
                Ok(path) => {
                    tracing::debug!("Using config file {}", path.display());
                    self.load_config(path)?
                }
                Err(_) => {
                    tracing::debug!("No cloudport.yaml found, using defaults");
                    Config::default()
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse config from YAML string
    pub fn parse_config(&self, content: &str) -> Result<Config> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use std::time::Duration;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
backend: azure
database:
  path: /var/lib/cloudport/state.db
timeouts:
  backend: 30s
  provision: 15m
limits:
  max_concurrent_cli: 2
azure:
  resource_group: rg-platform
  environment: cae-platform
  registry_server: example.azurecr.io
  registry_username: pusher
  min_replicas: 1
  max_replicas: 3
tenants: [client1, client2]
demo:
  seed_on_empty: true
"#;

        let config = Parser::new().parse_config(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.backend, BackendKind::Azure);
        assert_eq!(config.timeouts.backend_timeout(), Duration::from_secs(30));
        assert_eq!(config.timeouts.provision_timeout(), Duration::from_secs(900));
        assert_eq!(config.limits.max_concurrent_cli, 2);
        assert_eq!(config.azure.resource_group, "rg-platform");
        assert_eq!(config.azure.registry_password_env, "AZURE_REGISTRY_PASSWORD");
        assert_eq!(config.azure.max_replicas, 3);
        assert!(config.demo.seed_on_empty);
        assert!(config.is_known_tenant("client2"));
    }

    #[test]
    fn test_azure_location_is_ignored() {
        // Apps take their region from the environment
        let yaml = r#"
azure:
  resource_group: rg
  environment: cae
  location: westeurope
"#;
        let config = Parser::new().parse_config(yaml).unwrap();
        assert_eq!(config.azure.environment, "cae");
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = Parser::new().parse_config("   \n").unwrap();
        assert_eq!(config.backend, BackendKind::Docker);
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        let err = Parser::new().parse_config("services: {}\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_find_config_searches_parents() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.path().join("cloudport.yml"), "backend: simulated\n").unwrap();

        let found = Parser::find_config_in_dir(&nested).unwrap();
        assert_eq!(found, root.path().join("cloudport.yml"));

        let config = Parser::new().load_config(&found).unwrap();
        assert_eq!(config.backend, BackendKind::Simulated);
        assert_eq!(config.database.path, root.path().join("cloudport.db"));
    }
}
