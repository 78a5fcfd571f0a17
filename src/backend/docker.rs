//! Local Docker engine backend.
//!
//! Talks to the engine API over its unix socket with `bollard`. Responses
//! are re-read into small local structs keyed by the Engine API field names,
//! so only the fields used here need to be understood.

use super::metrics::{self, RawStats};
use super::{platform_labels, tenant_from_labels, BackendKind, ContainerBackend, Provisioned};
use crate::config::DockerConfig;
use crate::container::{ContainerStats, LiveContainer, ManagedContainer, PortMapping, Protocol};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
    StatsOptionsBuilder, StopContainerOptions,
};
use bollard::Docker;
use chrono::DateTime;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Grace period handed to the engine before it kills a stopping container.
const STOP_GRACE_SECS: i32 = 10;

/// Request timeout for the engine connection, in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 120;

pub struct DockerBackend {
    client: Docker,
    public_host: String,
}

impl DockerBackend {
    /// Connect to the engine. A missing unix socket fails here; no request
    /// is sent until the first call.
    pub fn connect(config: &DockerConfig) -> Result<Self> {
        let client = match &config.socket {
            Some(socket) => Docker::connect_with_unix(
                socket,
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| Error::backend("connect to docker", e))?;

        Ok(Self {
            client,
            public_host: config.public_host.clone(),
        })
    }

    fn url_for(&self, host_port: u16) -> String {
        format!("http://{}:{}", self.public_host, host_port)
    }

    /// Published URL for a freshly started container, from its first
    /// declared port that the engine actually bound.
    async fn published_url(
        &self,
        runtime_id: &str,
        ports: &[PortMapping],
    ) -> Result<Option<String>> {
        if ports.is_empty() {
            return Ok(None);
        }
        let details = self
            .client
            .inspect_container(runtime_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| Error::backend("inspect container", e))?;
        let inspect: InspectView = reread(&details)?;
        let bound = inspect
            .network_settings
            .and_then(|n| n.ports)
            .unwrap_or_default();

        Ok(ports.iter().find_map(|p| {
            bound
                .get(&p.key())
                .and_then(|b| b.as_ref())
                .and_then(|bindings| bindings.iter().find_map(|b| b.host_port.as_deref()))
                .and_then(|hp| hp.parse::<u16>().ok())
                .filter(|hp| *hp != 0)
                .map(|hp| self.url_for(hp))
        }))
    }
}

/// Re-read a bollard model through JSON into a local view struct.
fn reread<S: serde::Serialize, D: serde::de::DeserializeOwned>(value: &S) -> Result<D> {
    Ok(serde_json::from_value(serde_json::to_value(value)?)?)
}

fn status_code(err: &bollard::errors::Error) -> Option<u16> {
    match err {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct SummaryView {
    #[serde(rename = "Id", default)]
    id: Option<String>,
    #[serde(rename = "Names", default)]
    names: Option<Vec<String>>,
    #[serde(rename = "Image", default)]
    image: Option<String>,
    #[serde(rename = "State", default)]
    state: Option<String>,
    #[serde(rename = "Created", default)]
    created: Option<i64>,
    #[serde(rename = "Ports", default)]
    ports: Option<Vec<PortView>>,
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(rename = "NetworkSettings", default)]
    network_settings: Option<SummaryNetworks>,
}

#[derive(Debug, Deserialize)]
struct PortView {
    #[serde(rename = "PrivatePort", default)]
    private_port: Option<u16>,
    #[serde(rename = "PublicPort", default)]
    public_port: Option<u16>,
    #[serde(rename = "Type", default)]
    typ: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SummaryNetworks {
    #[serde(rename = "Networks", default)]
    networks: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct InspectView {
    #[serde(rename = "NetworkSettings", default)]
    network_settings: Option<InspectNetwork>,
}

#[derive(Debug, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "Ports", default)]
    ports: Option<HashMap<String, Option<Vec<BindingView>>>>,
}

#[derive(Debug, Deserialize)]
struct BindingView {
    #[serde(rename = "HostPort", default)]
    host_port: Option<String>,
}

impl SummaryView {
    fn into_live(self, public_host: &str) -> LiveContainer {
        let name = self
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        let labels = self.labels.unwrap_or_default();

        let ports: Vec<PortMapping> = self
            .ports
            .unwrap_or_default()
            .iter()
            .filter_map(|p| p.private_port.map(|port| (port, p)))
            .map(|(container_port, p)| PortMapping {
                container_port,
                host_port: p.public_port.filter(|hp| *hp != 0),
                protocol: match p.typ.as_deref() {
                    Some("udp") => Protocol::Udp,
                    _ => Protocol::Tcp,
                },
            })
            .collect();

        let url = ports
            .iter()
            .find_map(|p| p.host_port)
            .map(|hp| format!("http://{}:{}", public_host, hp));

        let mut networks: Vec<String> = self
            .network_settings
            .and_then(|n| n.networks)
            .map(|nets| nets.into_keys().collect())
            .unwrap_or_default();
        networks.sort();

        LiveContainer {
            runtime_id: self.id.unwrap_or_default(),
            name,
            image: self.image.unwrap_or_default(),
            runtime_status: self.state.unwrap_or_default(),
            created: self.created.and_then(|secs| DateTime::from_timestamp(secs, 0)),
            ports,
            networks,
            tenant: tenant_from_labels(&labels),
            labels,
            url,
            metrics: None,
        }
    }
}

fn create_body(container: &ManagedContainer) -> ContainerCreateBody {
    let env: Vec<String> = container
        .environment
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    for port in &container.ports {
        let key = port.key();
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: None,
                // "0" lets the engine pick a free host port
                host_port: Some(port.host_port.unwrap_or(0).to_string()),
            }]),
        );
    }

    let host_config = HostConfig {
        port_bindings: if port_bindings.is_empty() {
            None
        } else {
            Some(port_bindings)
        },
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(container.image.clone()),
        env: if env.is_empty() { None } else { Some(env) },
        labels: Some(platform_labels(container).into_iter().collect()),
        cmd: container.command.clone(),
        host_config: Some(host_config),
        exposed_ports: if exposed_ports.is_empty() {
            None
        } else {
            Some(exposed_ports)
        },
        ..Default::default()
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    async fn list(&self, tenant: Option<&str>, with_metrics: bool) -> Result<Vec<LiveContainer>> {
        let opts = ListContainersOptions {
            all: true,
            ..Default::default()
        };
        let summaries = self
            .client
            .list_containers(Some(opts))
            .await
            .map_err(|e| Error::backend("list containers", e))?;

        let mut live = Vec::with_capacity(summaries.len());
        for summary in &summaries {
            let view: SummaryView = reread(summary)?;
            let container = view.into_live(&self.public_host);
            // Two label spellings exist, so the tenant filter runs here
            // rather than as an engine-side label filter.
            if tenant.is_some() && container.tenant.as_deref() != tenant {
                continue;
            }
            live.push(container);
        }

        if with_metrics {
            let samples = futures::future::join_all(
                live.iter()
                    .filter(|c| c.runtime_status == "running")
                    .map(|c| async move {
                        (c.runtime_id.clone(), self.stats(&c.runtime_id).await)
                    }),
            )
            .await;
            let mut by_id: HashMap<String, ContainerStats> = samples
                .into_iter()
                .filter_map(|(id, stats)| stats.ok().map(|s| (id, s)))
                .collect();
            for container in &mut live {
                container.metrics = by_id.remove(&container.runtime_id);
            }
        }

        Ok(live)
    }

    async fn create(&self, container: &ManagedContainer) -> Result<Provisioned> {
        let opts = CreateContainerOptions {
            name: Some(container.id.clone()),
            ..Default::default()
        };
        let response = self
            .client
            .create_container(Some(opts), create_body(container))
            .await
            .map_err(|e| Error::backend("create container", e))?;
        let runtime_id = response.id;

        tracing::info!(
            "Container created: {} for tenant {}",
            runtime_id,
            container.tenant_id
        );

        self.start(&runtime_id).await?;
        let url = self.published_url(&runtime_id, &container.ports).await?;

        Ok(Provisioned { runtime_id, url })
    }

    async fn start(&self, container: &str) -> Result<()> {
        match self
            .client
            .start_container(container, None::<StartContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            // 304: already running
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(Error::backend("start container", e)),
        }
    }

    async fn stop(&self, container: &str) -> Result<()> {
        let opts = StopContainerOptions {
            t: Some(STOP_GRACE_SECS),
            signal: None,
        };
        match self.client.stop_container(container, Some(opts)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) => Err(Error::backend("stop container", e)),
        }
    }

    async fn restart(&self, container: &str) -> Result<()> {
        let opts = RestartContainerOptions {
            t: Some(STOP_GRACE_SECS),
            signal: None,
        };
        self.client
            .restart_container(container, Some(opts))
            .await
            .map_err(|e| Error::backend("restart container", e))?;
        tracing::info!("Container restarted: {}", container);
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<()> {
        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.client.remove_container(container, Some(opts)).await {
            Ok(()) => {
                tracing::info!("Container removed: {}", container);
                Ok(())
            }
            Err(e) if status_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(Error::backend("remove container", e)),
        }
    }

    async fn logs(&self, container: &str, tail: usize) -> Result<Vec<String>> {
        let opts = LogsOptions {
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        let mut stream = Box::pin(self.client.logs(container, Some(opts)));
        let mut lines = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::backend("fetch logs", e))?;
            let bytes = match chunk {
                bollard::container::LogOutput::StdOut { message }
                | bollard::container::LogOutput::StdErr { message }
                | bollard::container::LogOutput::StdIn { message }
                | bollard::container::LogOutput::Console { message } => message,
            };
            lines.extend(
                String::from_utf8_lossy(&bytes)
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(str::to_string),
            );
        }
        Ok(lines)
    }

    /// One sample of resource usage. Never fails: an unreachable engine or a
    /// stopped container yields a zeroed snapshot.
    async fn stats(&self, container: &str) -> Result<ContainerStats> {
        let opts = StatsOptionsBuilder::new().stream(false).one_shot(false).build();
        let mut stream = Box::pin(self.client.stats(container, Some(opts)));
        let sample = match stream.next().await {
            Some(Ok(sample)) => sample,
            Some(Err(e)) => {
                tracing::warn!("Failed to get stats for container {}: {}", container, e);
                return Ok(ContainerStats::zeroed(container));
            }
            None => {
                tracing::warn!("No stats sample returned for container {}", container);
                return Ok(ContainerStats::zeroed(container));
            }
        };
        match reread::<_, RawStats>(&sample) {
            Ok(raw) => Ok(metrics::to_stats(container, &raw)),
            Err(e) => {
                tracing::warn!("Unreadable stats for container {}: {}", container, e);
                Ok(ContainerStats::zeroed(container))
            }
        }
    }
}
