use super::Status;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Longest name accepted for a container (Docker and Azure both cap around here).
pub const MAX_NAME_LEN: usize = 63;

/// Category of workload a container provides.
///
/// Product names (`nginx`, `nodejs`, ...) are accepted on input as aliases
/// for the categories below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    WebServer,
    AppRuntime,
    InterpreterRuntime,
    DataStore,
    Custom,
}

impl ServiceType {
    pub const ALL: [ServiceType; 5] = [
        ServiceType::WebServer,
        ServiceType::AppRuntime,
        ServiceType::InterpreterRuntime,
        ServiceType::DataStore,
        ServiceType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::WebServer => "web-server",
            ServiceType::AppRuntime => "app-runtime",
            ServiceType::InterpreterRuntime => "interpreter-runtime",
            ServiceType::DataStore => "data-store",
            ServiceType::Custom => "custom",
        }
    }

    /// Short name used when generating container names.
    pub fn short_name(&self) -> &'static str {
        match self {
            ServiceType::WebServer => "nginx",
            ServiceType::AppRuntime => "nodejs",
            ServiceType::InterpreterRuntime => "python",
            ServiceType::DataStore => "database",
            ServiceType::Custom => "custom",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web-server" | "webserver" | "nginx" => Ok(ServiceType::WebServer),
            "app-runtime" | "nodejs" | "node" => Ok(ServiceType::AppRuntime),
            "interpreter-runtime" | "python" => Ok(ServiceType::InterpreterRuntime),
            "data-store" | "database" | "postgres" => Ok(ServiceType::DataStore),
            "custom" => Ok(ServiceType::Custom),
            other => Err(Error::Validation(format!(
                "unknown service type '{}' (expected one of: web-server, app-runtime, interpreter-runtime, data-store, custom)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// A declared port. `host_port` of `None` (or 0) lets the runtime pick one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    #[serde(default)]
    pub host_port: Option<u16>,
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortMapping {
    pub fn tcp(container_port: u16) -> Self {
        Self {
            container_port,
            host_port: None,
            protocol: Protocol::Tcp,
        }
    }

    /// Docker's `port/proto` key, e.g. `80/tcp`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol.as_str())
    }
}

impl FromStr for PortMapping {
    type Err = Error;

    /// Parses `CONTAINER[:HOST][/PROTO]`, e.g. `80`, `80:8080`, `53:0/udp`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Validation(format!("invalid port mapping '{}'", s));

        let (ports, protocol) = match s.split_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some(_) => return Err(invalid()),
            None => (s, Protocol::Tcp),
        };

        let (container, host) = match ports.split_once(':') {
            Some((c, h)) => (c, Some(h)),
            None => (ports, None),
        };

        let container_port: u16 = container.parse().map_err(|_| invalid())?;
        if container_port == 0 {
            return Err(invalid());
        }
        let host_port = match host {
            Some(h) => match h.parse::<u16>().map_err(|_| invalid())? {
                0 => None,
                p => Some(p),
            },
            None => None,
        };

        Ok(Self {
            container_port,
            host_port,
            protocol,
        })
    }
}

/// Request to create a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub tenant: String,
    pub service_type: ServiceType,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

impl ContainerSpec {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        tenant: impl Into<String>,
        service_type: ServiceType,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            tenant: tenant.into(),
            service_type,
            ports: Vec::new(),
            environment: BTreeMap::new(),
            labels: BTreeMap::new(),
            command: None,
        }
    }

    pub fn with_port(mut self, port: PortMapping) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = Some(command);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("name", &self.name)?;
        validate_tenant(&self.tenant)?;
        if self.image.trim().is_empty() {
            return Err(Error::Validation("image must not be empty".to_string()));
        }
        if self.image.chars().any(char::is_whitespace) {
            return Err(Error::Validation(format!(
                "image '{}' must not contain whitespace",
                self.image
            )));
        }
        for key in self.environment.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(Error::Validation(format!(
                    "invalid environment variable name '{}'",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Platform identifier for the container this spec describes.
    pub fn container_id(&self) -> String {
        platform_id(&self.tenant, &self.name)
    }
}

fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "{} '{}' exceeds {} characters",
            field, value, MAX_NAME_LEN
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::Validation(format!(
            "{} '{}' may only contain letters, digits, '-', '_' and '.'",
            field, value
        )));
    }
    Ok(())
}

/// Tenants additionally may not contain the id separator and must start
/// with a letter or digit.
fn validate_tenant(tenant: &str) -> Result<()> {
    validate_name("tenant", tenant)?;
    if tenant.contains(ID_SEPARATOR) {
        return Err(Error::Validation(format!(
            "tenant '{}' must not contain '{}'",
            tenant, ID_SEPARATOR
        )));
    }
    if !tenant.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(Error::Validation(format!(
            "tenant '{}' must start with a letter or digit",
            tenant
        )));
    }
    Ok(())
}

/// Separator between tenant and name in a platform id. Never valid in a tenant.
pub const ID_SEPARATOR: char = '.';

/// Stable row key for a tenant's container: `{tenant}.{name}`, case preserved.
///
/// The tenant cannot contain the separator, so the first separator always
/// marks the end of the tenant and two (tenant, name) pairs never share an id.
pub fn platform_id(tenant: &str, name: &str) -> String {
    format!("{}{}{}", tenant, ID_SEPARATOR, name)
}

/// One persisted container row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    pub runtime_id: Option<String>,
    pub tenant_id: String,
    pub image: String,
    pub service_type: ServiceType,
    pub ports: Vec<PortMapping>,
    pub environment: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub command: Option<Vec<String>>,
    pub status: Status,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedContainer {
    /// A fresh row for `spec`, in `Creating` status.
    pub fn from_spec(spec: &ContainerSpec) -> Self {
        let now = Utc::now();
        Self {
            id: spec.container_id(),
            name: spec.name.clone(),
            runtime_id: None,
            tenant_id: spec.tenant.clone(),
            image: spec.image.clone(),
            service_type: spec.service_type,
            ports: spec.ports.clone(),
            environment: spec.environment.clone(),
            labels: spec.labels.clone(),
            command: spec.command.clone(),
            status: Status::Creating,
            url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Identifier to hand to the backend: the runtime's own id once known,
    /// otherwise the platform id (which is also the runtime name).
    pub fn backend_ref(&self) -> &str {
        self.runtime_id.as_deref().unwrap_or(&self.id)
    }

    pub fn is_demo(&self) -> bool {
        self.labels.get("demo").map(String::as_str) == Some("true")
    }
}

/// A container as the backend currently sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveContainer {
    pub runtime_id: String,
    pub name: String,
    pub image: String,
    /// Backend-specific status string, untranslated.
    pub runtime_status: String,
    pub created: Option<DateTime<Utc>>,
    pub ports: Vec<PortMapping>,
    pub networks: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub tenant: Option<String>,
    pub url: Option<String>,
    pub metrics: Option<ContainerStats>,
}

/// Point-in-time resource snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub container_id: String,
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

impl ContainerStats {
    /// Structurally valid placeholder for backends without real metrics.
    pub fn zeroed(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            cpu_percent: 0.0,
            memory_usage: 0,
            memory_limit: 0,
            memory_percent: 0.0,
            network_rx_bytes: 0,
            network_tx_bytes: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_percent == 0.0
            && self.memory_usage == 0
            && self.memory_limit == 0
            && self.network_rx_bytes == 0
            && self.network_tx_bytes == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Client,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "client" => Ok(Role::Client),
            other => Err(Error::Validation(format!("unknown role '{}'", other))),
        }
    }
}

/// The authenticated identity on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user: String,
    pub role: Role,
    pub tenant: Option<String>,
}

impl Caller {
    pub fn admin(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            role: Role::Admin,
            tenant: None,
        }
    }

    pub fn client(user: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            role: Role::Client,
            tenant: Some(tenant.into()),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can_access(&self, container: &ManagedContainer) -> bool {
        self.is_admin() || self.tenant.as_deref() == Some(container.tenant_id.as_str())
    }

    /// Tenant the caller is allowed to see; `None` means all tenants.
    ///
    /// Clients are pinned to their own tenant whatever they request.
    pub fn scope(&self, requested: Option<&str>) -> Result<Option<String>> {
        if self.is_admin() {
            return Ok(requested.map(str::to_string));
        }
        match &self.tenant {
            Some(own) => Ok(Some(own.clone())),
            None => Err(Error::Validation(format!(
                "client '{}' has no tenant",
                self.user
            ))),
        }
    }
}

/// One row of the activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub actor: String,
    pub actor_tenant: Option<String>,
    pub target: Option<String>,
    pub action: String,
    pub detail: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_type_accepts_legacy_names() {
        assert_eq!("nginx".parse::<ServiceType>().unwrap(), ServiceType::WebServer);
        assert_eq!("nodejs".parse::<ServiceType>().unwrap(), ServiceType::AppRuntime);
        assert_eq!(
            "python".parse::<ServiceType>().unwrap(),
            ServiceType::InterpreterRuntime
        );
        assert_eq!("database".parse::<ServiceType>().unwrap(), ServiceType::DataStore);
        assert_eq!(
            "web-server".parse::<ServiceType>().unwrap(),
            ServiceType::WebServer
        );
        assert!("mainframe".parse::<ServiceType>().is_err());
    }

    #[test]
    fn service_type_serde_is_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ServiceType::InterpreterRuntime).unwrap(),
            "\"interpreter-runtime\""
        );
    }

    #[test]
    fn port_mapping_parsing() {
        let p: PortMapping = "80".parse().unwrap();
        assert_eq!(p, PortMapping::tcp(80));

        let p: PortMapping = "80:8080".parse().unwrap();
        assert_eq!(p.host_port, Some(8080));

        let p: PortMapping = "53:0/udp".parse().unwrap();
        assert_eq!(p.host_port, None);
        assert_eq!(p.protocol, Protocol::Udp);
        assert_eq!(p.key(), "53/udp");

        assert!("0".parse::<PortMapping>().is_err());
        assert!("80/sctp".parse::<PortMapping>().is_err());
        assert!("http".parse::<PortMapping>().is_err());
    }

    #[test]
    fn spec_validation() {
        let spec = ContainerSpec::new("web1", "nginx:alpine", "t1", ServiceType::WebServer);
        assert!(spec.validate().is_ok());
        assert_eq!(spec.container_id(), "t1.web1");

        let bad = ContainerSpec::new("web 1", "nginx", "t1", ServiceType::WebServer);
        assert!(matches!(bad.validate(), Err(Error::Validation(_))));

        let bad = ContainerSpec::new("web1", "", "t1", ServiceType::WebServer);
        assert!(bad.validate().is_err());

        let bad = ContainerSpec::new("web1", "nginx", "", ServiceType::WebServer);
        assert!(bad.validate().is_err());

        let long = "a".repeat(MAX_NAME_LEN + 1);
        let bad = ContainerSpec::new(long, "nginx", "t1", ServiceType::WebServer);
        assert!(bad.validate().is_err());

        let bad = ContainerSpec::new("web1", "nginx", "t1", ServiceType::WebServer)
            .with_env("A=B", "c");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn platform_ids_never_collide_across_tenants() {
        // Same concatenation, different owners
        assert_ne!(platform_id("a", "b-web"), platform_id("a-b", "web"));
        assert_ne!(platform_id("a", "b.web"), platform_id("a.b", "web"));
        // Case is significant
        assert_ne!(platform_id("T1", "web"), platform_id("t1", "web"));

        for tenant in ["a.b", ".a", "-a", "_a"] {
            let spec = ContainerSpec::new("web", "nginx", tenant, ServiceType::WebServer);
            assert!(
                matches!(spec.validate(), Err(Error::Validation(_))),
                "tenant {:?} should be rejected",
                tenant
            );
        }
        let dotted_name = ContainerSpec::new("web.v2", "nginx", "a-b", ServiceType::WebServer);
        assert!(dotted_name.validate().is_ok());
        assert_eq!(dotted_name.container_id(), "a-b.web.v2");
    }

    #[test]
    fn new_row_starts_creating() {
        let spec = ContainerSpec::new("Web1", "nginx", "T1", ServiceType::WebServer);
        let row = ManagedContainer::from_spec(&spec);
        assert_eq!(row.id, "T1.Web1");
        assert_eq!(row.status, Status::Creating);
        assert_eq!(row.backend_ref(), "T1.Web1");
    }

    #[test]
    fn client_scope_is_pinned_to_own_tenant() {
        let client = Caller::client("alice", "t1");
        assert_eq!(client.scope(Some("t2")).unwrap(), Some("t1".to_string()));
        assert_eq!(client.scope(None).unwrap(), Some("t1".to_string()));

        let admin = Caller::admin("root");
        assert_eq!(admin.scope(Some("t2")).unwrap(), Some("t2".to_string()));
        assert_eq!(admin.scope(None).unwrap(), None);
    }

    #[test]
    fn access_requires_ownership_or_admin() {
        let spec = ContainerSpec::new("web1", "nginx", "t1", ServiceType::WebServer);
        let row = ManagedContainer::from_spec(&spec);
        assert!(Caller::client("a", "t1").can_access(&row));
        assert!(!Caller::client("b", "t2").can_access(&row));
        assert!(Caller::admin("root").can_access(&row));
    }

    #[test]
    fn zeroed_stats_are_zero() {
        let stats = ContainerStats::zeroed("abc");
        assert!(stats.is_zero());
        assert_eq!(stats.container_id, "abc");
    }
}
