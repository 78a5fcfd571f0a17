//! Merging persisted rows with what the backend actually runs.
//!
//! The store is the source of truth for which containers exist and who owns
//! them; the backend is the source of truth for whether they are running.
//! [`Reconciler::list`] reads both, writes observed status changes back, and
//! reports live containers the platform does not manage.

use crate::backend::ContainerBackend;
use crate::container::{
    ContainerStats, LiveContainer, ManagedContainer, PortMapping, ServiceType, Status,
};
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::state::ContainerRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Translate a backend status string into the canonical status.
///
/// Covers Docker container states and Azure provisioning/running states.
/// Anything unrecognized is an error, never passed through.
pub fn map_runtime_status(runtime: &str) -> Status {
    match runtime.trim().to_ascii_lowercase().as_str() {
        "created" => Status::Created,
        "running" => Status::Running,
        "restarting" => Status::Starting,
        "paused" | "exited" | "stopped" => Status::Stopped,
        "dead" => Status::Error,
        "removing" | "deleting" => Status::Removing,
        "creating" | "provisioning" | "inprogress" | "pending" => Status::Creating,
        "succeeded" => Status::Running,
        "failed" | "canceled" => Status::Error,
        _ => Status::Error,
    }
}

/// One line of a container listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerView {
    pub id: String,
    pub name: String,
    pub tenant: Option<String>,
    pub image: String,
    pub service_type: Option<ServiceType>,
    pub status: Status,
    /// Untranslated backend status, when the backend reported this container.
    pub runtime_status: Option<String>,
    pub runtime_id: Option<String>,
    pub url: Option<String>,
    pub ports: Vec<PortMapping>,
    /// False for live containers that have no row in the store.
    pub managed: bool,
    pub demo: bool,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ContainerStats>,
}

impl ContainerView {
    pub(crate) fn from_row(row: ManagedContainer, live: Option<&LiveContainer>) -> Self {
        Self {
            demo: row.is_demo(),
            runtime_status: live.map(|l| l.runtime_status.clone()),
            runtime_id: row
                .runtime_id
                .clone()
                .or_else(|| live.map(|l| l.runtime_id.clone())),
            url: row.url.clone().or_else(|| live.and_then(|l| l.url.clone())),
            metrics: live.and_then(|l| l.metrics.clone()),
            ports: if row.ports.is_empty() {
                live.map(|l| l.ports.clone()).unwrap_or_default()
            } else {
                row.ports
            },
            id: row.id,
            name: row.name,
            tenant: Some(row.tenant_id),
            image: row.image,
            service_type: Some(row.service_type),
            status: row.status,
            managed: true,
            created_at: Some(row.created_at),
        }
    }

    fn unmanaged(live: LiveContainer) -> Self {
        Self {
            id: live.name.clone(),
            status: map_runtime_status(&live.runtime_status),
            runtime_status: Some(live.runtime_status),
            runtime_id: Some(live.runtime_id),
            name: live.name,
            tenant: live.tenant,
            image: live.image,
            service_type: None,
            url: live.url,
            ports: live.ports,
            managed: false,
            demo: false,
            created_at: live.created,
            metrics: live.metrics,
        }
    }
}

/// When sample containers are written for an empty tenant.
#[derive(Debug, Clone, Default)]
pub struct DemoSeeding {
    pub enabled: bool,
    pub known_tenants: Vec<String>,
}

impl DemoSeeding {
    fn applies_to(&self, tenant: &str) -> bool {
        self.enabled && self.known_tenants.iter().any(|t| t == tenant)
    }
}

pub struct Reconciler {
    containers: ContainerRepository,
    backend: Arc<dyn ContainerBackend>,
    locks: KeyedLocks,
    backend_timeout: Duration,
    demo: DemoSeeding,
}

impl Reconciler {
    pub fn new(
        containers: ContainerRepository,
        backend: Arc<dyn ContainerBackend>,
        locks: KeyedLocks,
        backend_timeout: Duration,
        demo: DemoSeeding,
    ) -> Self {
        Self {
            containers,
            backend,
            locks,
            backend_timeout,
            demo,
        }
    }

    /// Containers for `tenant` (all tenants when `None`), persisted and live.
    pub async fn list(
        &self,
        tenant: Option<&str>,
        with_metrics: bool,
    ) -> Result<Vec<ContainerView>> {
        let rows = self.containers.list(tenant).await?;
        let live = self.live(tenant, with_metrics).await;

        let mut matched: HashSet<usize> = HashSet::new();
        let mut views = Vec::with_capacity(rows.len());

        for row in rows {
            let index = live.iter().position(|l| {
                row.runtime_id.as_deref() == Some(l.runtime_id.as_str()) || l.name == row.id
            });
            let observed = index.map(|i| &live[i]);
            if let Some(i) = index {
                matched.insert(i);
            }

            let row = match observed {
                Some(l) => self.apply_observed(row, l).await?,
                None => row,
            };
            views.push(ContainerView::from_row(row, observed));
        }

        for (i, l) in live.into_iter().enumerate() {
            if matched.contains(&i) {
                continue;
            }
            let visible = match (&l.tenant, tenant) {
                (Some(owner), Some(filter)) => owner == filter,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if visible {
                views.push(ContainerView::unmanaged(l));
            }
        }

        if views.is_empty() {
            if let Some(tenant) = tenant.filter(|t| self.demo.applies_to(t)) {
                return self.seed_demo(tenant).await;
            }
        }

        Ok(views)
    }

    /// Live containers, or none when the backend cannot be reached.
    async fn live(&self, tenant: Option<&str>, with_metrics: bool) -> Vec<LiveContainer> {
        match tokio::time::timeout(self.backend_timeout, self.backend.list(tenant, with_metrics))
            .await
        {
            Ok(Ok(live)) => live,
            Ok(Err(e)) => {
                warn!(
                    "Listing from {} backend failed, showing stored state only: {}",
                    self.backend.kind(),
                    e
                );
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Listing from {} backend timed out after {:?}, showing stored state only",
                    self.backend.kind(),
                    self.backend_timeout
                );
                Vec::new()
            }
        }
    }

    /// Persist the observed status if it changed and nobody is operating on the row.
    async fn apply_observed(
        &self,
        row: ManagedContainer,
        live: &LiveContainer,
    ) -> Result<ManagedContainer> {
        let observed = map_runtime_status(&live.runtime_status);
        if observed == row.status {
            return Ok(row);
        }
        if row.status == Status::Creating && self.backend.provisions_async() {
            debug!("{} is still provisioning, keeping stored status", row.id);
            return Ok(row);
        }
        let Some(_guard) = self.locks.try_lock(&row.id) else {
            debug!("{} has an operation in flight, keeping stored status", row.id);
            return Ok(row);
        };

        // An operation may have settled between the listing and the lock. Its
        // write is newer than the live snapshot, so it wins.
        let Some(current) = self.containers.get(&row.id).await? else {
            return Ok(row);
        };
        if current.status != row.status || current.runtime_id != row.runtime_id {
            debug!("{} changed since it was listed, keeping stored status", row.id);
            return Ok(current);
        }

        info!(
            "{} is {} on the backend (stored: {}), updating",
            current.id, live.runtime_status, current.status
        );
        let updated = if current.runtime_id.is_none() {
            self.containers
                .mark_provisioned(&current.id, &live.runtime_id, live.url.as_deref(), observed)
                .await?
        } else {
            self.containers.set_status(&current.id, observed).await?
        };
        Ok(updated.unwrap_or(current))
    }

    async fn seed_demo(&self, tenant: &str) -> Result<Vec<ContainerView>> {
        info!("Seeding demo containers for tenant {}", tenant);
        for (name, service_type, status) in [
            ("demo-nginx", ServiceType::WebServer, Status::Running),
            ("demo-app", ServiceType::AppRuntime, Status::Stopped),
        ] {
            let mut row = ManagedContainer::from_spec(
                &crate::container::ContainerSpec::new(name, "nginx:alpine", tenant, service_type)
                    .with_port(PortMapping::tcp(80))
                    .with_env("CLIENT_ID", tenant)
                    .with_label("demo", "true"),
            );
            row.status = status;
            match self.containers.insert(&row).await {
                Ok(_) | Err(Error::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(self
            .containers
            .list(Some(tenant))
            .await?
            .into_iter()
            .map(|row| ContainerView::from_row(row, None))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_states() {
        assert_eq!(map_runtime_status("created"), Status::Created);
        assert_eq!(map_runtime_status("running"), Status::Running);
        assert_eq!(map_runtime_status("restarting"), Status::Starting);
        assert_eq!(map_runtime_status("paused"), Status::Stopped);
        assert_eq!(map_runtime_status("exited"), Status::Stopped);
        assert_eq!(map_runtime_status("dead"), Status::Error);
        assert_eq!(map_runtime_status("removing"), Status::Removing);
    }

    #[test]
    fn azure_states() {
        assert_eq!(map_runtime_status("Succeeded"), Status::Running);
        assert_eq!(map_runtime_status("InProgress"), Status::Creating);
        assert_eq!(map_runtime_status("Provisioning"), Status::Creating);
        assert_eq!(map_runtime_status("Failed"), Status::Error);
        assert_eq!(map_runtime_status("Canceled"), Status::Error);
        assert_eq!(map_runtime_status("Deleting"), Status::Removing);
    }

    #[test]
    fn unknown_states_are_errors() {
        assert_eq!(map_runtime_status(""), Status::Error);
        assert_eq!(map_runtime_status("hibernating"), Status::Error);
    }

    #[test]
    fn demo_seeding_needs_flag_and_known_tenant() {
        let seeding = DemoSeeding {
            enabled: true,
            known_tenants: vec!["acme".into()],
        };
        assert!(seeding.applies_to("acme"));
        assert!(!seeding.applies_to("other"));
        assert!(!DemoSeeding::default().applies_to("acme"));
    }
}
