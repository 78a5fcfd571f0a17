//! Azure Container Apps backend, driven through the `az` CLI.
//!
//! Stopping a container app here means disabling its external ingress: the
//! revision keeps running (and billing) but is no longer reachable. Starting
//! re-enables ingress. Provisioning is slow, so [`AzureBackend`] reports
//! `provisions_async() == true` and the orchestrator finishes `create` in
//! the background.

use super::cli::{CliError, CliRunner};
use super::{BackendKind, ContainerBackend, Provisioned, PLATFORM_ID_LABEL};
use crate::config::AzureConfig;
use crate::container::{ContainerStats, LiveContainer, ManagedContainer, PortMapping};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Resource tag carrying the owning tenant (tags cannot contain dots).
pub const TENANT_TAG: &str = "cloudport-tenant";
const PLATFORM_ID_TAG: &str = "cloudport-id";
/// Ingress port chosen at create time; `start` re-enables ingress on it.
const TARGET_PORT_TAG: &str = "cloudport-target-port";

/// Container app names: lowercase letters, digits and '-', at most 32 chars.
const MAX_APP_NAME: usize = 32;

pub struct AzureBackend {
    config: AzureConfig,
    runner: CliRunner,
    command_timeout: Duration,
    provision_timeout: Duration,
}

/// Hex digits of the id hash appended to names that had to be rewritten.
const NAME_HASH_LEN: usize = 8;

/// Container app name for a runtime reference.
///
/// References that already are valid app names pass through unchanged, so
/// names returned by earlier calls can be passed in again. Anything else is
/// rewritten to a readable prefix plus a hash of the full reference, so two
/// references never share an app even when their prefixes do.
pub fn app_name(reference: &str) -> String {
    if is_valid_app_name(reference) {
        return reference.to_string();
    }

    let mut readable = String::with_capacity(reference.len());
    for c in reference.chars() {
        if c.is_ascii_alphanumeric() {
            readable.push(c.to_ascii_lowercase());
        } else if !readable.is_empty() && !readable.ends_with('-') {
            readable.push('-');
        }
    }
    if !readable.starts_with(|c: char| c.is_ascii_alphabetic()) {
        readable.insert_str(0, "app-");
    }
    readable.truncate(MAX_APP_NAME - NAME_HASH_LEN - 1);

    let digest = format!("{:x}", Sha256::digest(reference.as_bytes()));
    format!(
        "{}-{}",
        readable.trim_end_matches('-'),
        &digest[..NAME_HASH_LEN]
    )
}

/// Lowercase letters, digits and single hyphens; starts with a letter and
/// ends with a letter or digit.
fn is_valid_app_name(name: &str) -> bool {
    (2..=MAX_APP_NAME).contains(&name.len())
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name.ends_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.contains("--")
}

impl AzureBackend {
    pub fn new(
        config: AzureConfig,
        max_concurrent_cli: usize,
        command_timeout: Duration,
        provision_timeout: Duration,
    ) -> Self {
        let runner = CliRunner::new(config.cli.clone(), max_concurrent_cli);
        Self {
            config,
            runner,
            command_timeout,
            provision_timeout,
        }
    }

    fn scope_args(&self, name: &str) -> Vec<String> {
        vec![
            "--name".to_string(),
            name.to_string(),
            "--resource-group".to_string(),
            self.config.resource_group.clone(),
        ]
    }

    fn registry_password(&self) -> Result<Option<String>> {
        if self.config.registry_username.is_none() {
            return Ok(None);
        }
        match std::env::var(&self.config.registry_password_env) {
            Ok(password) if !password.is_empty() => Ok(Some(password)),
            _ => Err(Error::backend(
                "create container app",
                format!(
                    "registry password variable {} is not set",
                    self.config.registry_password_env
                ),
            )),
        }
    }

    fn target_port(&self, ports: &[PortMapping]) -> u16 {
        ports
            .first()
            .map(|p| p.container_port)
            .unwrap_or(self.config.target_port)
    }

    /// Arguments for `az containerapp create`.
    pub fn create_args(&self, container: &ManagedContainer, password: Option<&str>) -> Vec<String> {
        let name = app_name(&container.id);
        let mut args = vec!["containerapp".to_string(), "create".to_string()];
        args.extend(self.scope_args(&name));
        args.extend([
            "--environment".to_string(),
            self.config.environment.clone(),
            "--image".to_string(),
            container.image.clone(),
            "--target-port".to_string(),
            self.target_port(&container.ports).to_string(),
            "--ingress".to_string(),
            "external".to_string(),
            "--cpu".to_string(),
            self.config.cpu.clone(),
            "--memory".to_string(),
            self.config.memory.clone(),
            "--min-replicas".to_string(),
            self.config.min_replicas.to_string(),
            "--max-replicas".to_string(),
            self.config.max_replicas.to_string(),
        ]);

        if let Some(server) = &self.config.registry_server {
            args.extend(["--registry-server".to_string(), server.clone()]);
            if let Some(user) = &self.config.registry_username {
                args.extend(["--registry-username".to_string(), user.clone()]);
            }
            if let Some(password) = password {
                args.extend(["--registry-password".to_string(), password.to_string()]);
            }
        }

        if !container.environment.is_empty() {
            args.push("--env-vars".to_string());
            args.extend(
                container
                    .environment
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v)),
            );
        }

        if let Some(command) = &container.command {
            if let Some((program, rest)) = command.split_first() {
                args.extend(["--command".to_string(), program.clone()]);
                if !rest.is_empty() {
                    args.push("--args".to_string());
                    args.extend(rest.iter().cloned());
                }
            }
        }

        args.push("--tags".to_string());
        args.push(format!("{}={}", TENANT_TAG, container.tenant_id));
        args.push(format!("{}={}", PLATFORM_ID_TAG, container.id));
        args.push(format!(
            "cloudport-service-type={}",
            container.service_type.as_str()
        ));
        args.push(format!(
            "{}={}",
            TARGET_PORT_TAG,
            self.target_port(&container.ports)
        ));

        args.extend(["--output".to_string(), "none".to_string()]);
        args
    }

    async fn fqdn(&self, name: &str) -> Result<Option<String>> {
        let mut args = vec!["containerapp".to_string(), "show".to_string()];
        args.extend(self.scope_args(name));
        args.extend([
            "--query".to_string(),
            "properties.configuration.ingress.fqdn".to_string(),
            "-o".to_string(),
            "tsv".to_string(),
        ]);
        let out = self
            .runner
            .run_success(&args, self.command_timeout)
            .await
            .map_err(|e| Error::backend("read container app hostname", e))?;
        Ok(Some(out).filter(|fqdn| !fqdn.is_empty()))
    }

    /// Port ingress was created with, read back from the app's tags.
    async fn ingress_port(&self, name: &str) -> Result<u16> {
        let mut args = vec!["containerapp".to_string(), "show".to_string()];
        args.extend(self.scope_args(name));
        args.extend([
            "--query".to_string(),
            "tags".to_string(),
            "-o".to_string(),
            "json".to_string(),
        ]);
        let out = self
            .az("show tags", args)
            .await
            .map_err(|e| Error::backend("read container app tags", e))?;
        Ok(target_port_from_tags(&out).unwrap_or_else(|| {
            tracing::warn!(
                "Container app {} has no {} tag, enabling ingress on port {}",
                name,
                TARGET_PORT_TAG,
                self.config.target_port
            );
            self.config.target_port
        }))
    }

    async fn az(
        &self,
        operation: &str,
        args: Vec<String>,
    ) -> std::result::Result<String, CliError> {
        tracing::debug!("az {}", operation);
        self.runner.run_success(&args, self.command_timeout).await
    }
}

#[derive(Debug, Deserialize)]
struct AppView {
    name: String,
    #[serde(default)]
    tags: Option<BTreeMap<String, String>>,
    #[serde(default)]
    properties: Option<AppProperties>,
    #[serde(default, rename = "systemData")]
    system_data: Option<SystemData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppProperties {
    #[serde(default)]
    provisioning_state: Option<String>,
    #[serde(default)]
    configuration: Option<AppConfiguration>,
    #[serde(default)]
    template: Option<AppTemplate>,
}

#[derive(Debug, Deserialize)]
struct AppConfiguration {
    #[serde(default)]
    ingress: Option<Ingress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ingress {
    #[serde(default)]
    fqdn: Option<String>,
    #[serde(default)]
    target_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct AppTemplate {
    #[serde(default)]
    containers: Option<Vec<TemplateContainer>>,
}

#[derive(Debug, Deserialize)]
struct TemplateContainer {
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SystemData {
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl AppView {
    fn into_live(self) -> LiveContainer {
        let tags = self.tags.unwrap_or_default();
        let properties = self.properties;
        let ingress = properties
            .as_ref()
            .and_then(|p| p.configuration.as_ref())
            .and_then(|c| c.ingress.as_ref());
        let provisioning = properties
            .as_ref()
            .and_then(|p| p.provisioning_state.clone())
            .unwrap_or_default();

        // A provisioned app with ingress disabled is what `stop` leaves behind.
        let stopped = provisioning.eq_ignore_ascii_case("succeeded") && ingress.is_none();
        let runtime_status = if stopped {
            "stopped".to_string()
        } else {
            provisioning
        };

        let url = ingress
            .and_then(|i| i.fqdn.as_ref())
            .filter(|f| !f.is_empty())
            .map(|f| format!("https://{}", f));
        let ports = ingress
            .and_then(|i| i.target_port)
            .map(|p| vec![PortMapping::tcp(p)])
            .unwrap_or_default();
        let image = properties
            .as_ref()
            .and_then(|p| p.template.as_ref())
            .and_then(|t| t.containers.as_ref())
            .and_then(|c| c.first())
            .and_then(|c| c.image.clone())
            .unwrap_or_default();

        let mut labels = BTreeMap::new();
        if let Some(tenant) = tags.get(TENANT_TAG) {
            labels.insert(super::TENANT_LABEL.to_string(), tenant.clone());
        }
        if let Some(id) = tags.get(PLATFORM_ID_TAG) {
            labels.insert(PLATFORM_ID_LABEL.to_string(), id.clone());
        }
        for (k, v) in &tags {
            labels.entry(k.clone()).or_insert_with(|| v.clone());
        }

        LiveContainer {
            runtime_id: self.name.clone(),
            name: tags.get(PLATFORM_ID_TAG).cloned().unwrap_or(self.name),
            image,
            runtime_status,
            created: self.system_data.and_then(|s| s.created_at),
            ports,
            networks: Vec::new(),
            tenant: tags.get(TENANT_TAG).cloned(),
            labels,
            url,
            metrics: None,
        }
    }
}

/// Target port recorded in the tags JSON of `az containerapp show --query tags`.
fn target_port_from_tags(json: &str) -> Option<u16> {
    let tags: Option<BTreeMap<String, String>> = serde_json::from_str(json.trim()).ok()?;
    tags?.get(TARGET_PORT_TAG)?.parse().ok()
}

/// Parse `az containerapp list -o json`, keeping only apps tagged for `tenant`.
pub fn parse_app_list(json: &str, tenant: Option<&str>) -> Result<Vec<LiveContainer>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let apps: Vec<AppView> = serde_json::from_str(json)?;
    Ok(apps
        .into_iter()
        .map(AppView::into_live)
        .filter(|c| tenant.is_none() || c.tenant.as_deref() == tenant)
        .collect())
}

#[async_trait]
impl ContainerBackend for AzureBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Azure
    }

    fn provisions_async(&self) -> bool {
        true
    }

    async fn list(&self, tenant: Option<&str>, with_metrics: bool) -> Result<Vec<LiveContainer>> {
        let args = vec![
            "containerapp".to_string(),
            "list".to_string(),
            "--resource-group".to_string(),
            self.config.resource_group.clone(),
            "-o".to_string(),
            "json".to_string(),
        ];
        let out = self
            .az("list", args)
            .await
            .map_err(|e| Error::backend("list container apps", e))?;
        let mut live = parse_app_list(&out, tenant)?;
        if with_metrics {
            for container in &mut live {
                container.metrics = Some(ContainerStats::zeroed(&container.runtime_id));
            }
        }
        Ok(live)
    }

    async fn create(&self, container: &ManagedContainer) -> Result<Provisioned> {
        let name = app_name(&container.id);
        let password = self.registry_password()?;
        let args = self.create_args(container, password.as_deref());

        tracing::info!("Creating container app {} for tenant {}", name, container.tenant_id);
        self.runner
            .run_success(&args, self.provision_timeout)
            .await
            .map_err(|e| Error::backend("create container app", e))?;

        let url = self.fqdn(&name).await?.map(|fqdn| format!("https://{}", fqdn));
        Ok(Provisioned {
            runtime_id: name,
            url,
        })
    }

    async fn start(&self, container: &str) -> Result<()> {
        let name = app_name(container);
        let port = self.ingress_port(&name).await?;
        let mut args = vec![
            "containerapp".to_string(),
            "ingress".to_string(),
            "enable".to_string(),
        ];
        args.extend(self.scope_args(&name));
        args.extend([
            "--type".to_string(),
            "external".to_string(),
            "--target-port".to_string(),
            port.to_string(),
            "--output".to_string(),
            "none".to_string(),
        ]);
        self.az("ingress enable", args)
            .await
            .map_err(|e| Error::backend("enable ingress", e))?;
        Ok(())
    }

    async fn stop(&self, container: &str) -> Result<()> {
        let name = app_name(container);
        let mut args = vec![
            "containerapp".to_string(),
            "ingress".to_string(),
            "disable".to_string(),
        ];
        args.extend(self.scope_args(&name));
        args.extend(["--output".to_string(), "none".to_string()]);
        self.az("ingress disable", args)
            .await
            .map_err(|e| Error::backend("disable ingress", e))?;
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<()> {
        let name = app_name(container);
        let mut args = vec!["containerapp".to_string(), "delete".to_string()];
        args.extend(self.scope_args(&name));
        args.push("--yes".to_string());
        match self.az("delete", args).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(Error::backend("delete container app", e)),
        }
    }

    async fn logs(&self, container: &str, tail: usize) -> Result<Vec<String>> {
        let name = app_name(container);
        let mut args = vec![
            "containerapp".to_string(),
            "logs".to_string(),
            "show".to_string(),
        ];
        args.extend(self.scope_args(&name));
        args.extend([
            "--tail".to_string(),
            tail.to_string(),
            "--format".to_string(),
            "text".to_string(),
        ]);
        match self.az("logs show", args).await {
            Ok(out) => Ok(out
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) => {
                tracing::warn!("Failed to read logs for container app {}: {}", name, e);
                Ok(vec![format!("Logs are not available yet for {}", name)])
            }
        }
    }

    /// Container Apps exposes no cheap per-app usage sample.
    async fn stats(&self, container: &str) -> Result<ContainerStats> {
        Ok(ContainerStats::zeroed(container))
    }
}
