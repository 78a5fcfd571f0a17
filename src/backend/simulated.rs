//! In-memory backend for demos and tests.

use super::{platform_labels, tenant_from_labels, BackendKind, ContainerBackend, Provisioned};
use crate::container::{ContainerStats, LiveContainer, ManagedContainer};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

const FIRST_HOST_PORT: u64 = 32768;

#[derive(Debug, Clone)]
struct SimContainer {
    runtime_id: String,
    name: String,
    image: String,
    state: String,
    created: DateTime<Utc>,
    labels: BTreeMap<String, String>,
    ports: Vec<crate::container::PortMapping>,
    url: Option<String>,
}

/// A container runtime that lives entirely in memory.
///
/// Honors every call the way a real engine would (stopping a stopped
/// container and removing a missing one both succeed). Faults and latency
/// can be injected to exercise error paths.
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    containers: Mutex<HashMap<String, SimContainer>>,
    next_id: AtomicU64,
    fail_all: AtomicBool,
    async_provisioning: bool,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like a cloud backend: `create` is finished in the background.
    pub fn with_async_provisioning() -> Self {
        Self {
            async_provisioning: true,
            ..Self::default()
        }
    }

    /// Make every subsequent call fail with a backend error.
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Operations performed so far, as `"<op> <ref>"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Put a container in place without going through `create`, as if it had
    /// been started outside the platform.
    pub fn insert_live(&self, name: &str, tenant: Option<&str>, state: &str) -> String {
        let runtime_id = self.allocate_id();
        let mut labels = BTreeMap::new();
        if let Some(tenant) = tenant {
            labels.insert(super::TENANT_LABEL.to_string(), tenant.to_string());
        }
        self.containers.lock().insert(
            runtime_id.clone(),
            SimContainer {
                runtime_id: runtime_id.clone(),
                name: name.to_string(),
                image: "busybox:latest".to_string(),
                state: state.to_string(),
                created: Utc::now(),
                labels,
                ports: Vec::new(),
                url: None,
            },
        );
        runtime_id
    }

    /// Force the runtime state of a container, e.g. to simulate a crash.
    pub fn set_state(&self, container: &str, state: &str) -> bool {
        let mut containers = self.containers.lock();
        match find_key(&containers, container) {
            Some(key) => {
                if let Some(c) = containers.get_mut(&key) {
                    c.state = state.to_string();
                }
                true
            }
            None => false,
        }
    }

    pub fn state_of(&self, container: &str) -> Option<String> {
        let containers = self.containers.lock();
        find_key(&containers, container).and_then(|k| containers.get(&k).map(|c| c.state.clone()))
    }

    pub fn len(&self) -> usize {
        self.containers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn allocate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("sim{:013x}", n)
    }

    async fn enter(&self, op: &str, container: &str) -> Result<()> {
        self.calls.lock().push(format!("{} {}", op, container));
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(Error::backend(op, "simulated backend failure"));
        }
        Ok(())
    }

    fn with_container<T>(
        &self,
        op: &str,
        container: &str,
        f: impl FnOnce(&mut SimContainer) -> T,
    ) -> Result<T> {
        let mut containers = self.containers.lock();
        let key = find_key(&containers, container)
            .ok_or_else(|| Error::backend(op, format!("No such container: {}", container)))?;
        containers
            .get_mut(&key)
            .map(f)
            .ok_or_else(|| Error::backend(op, format!("No such container: {}", container)))
    }
}

/// Resolve a reference (runtime id or name) to the map key.
fn find_key(containers: &HashMap<String, SimContainer>, container: &str) -> Option<String> {
    if containers.contains_key(container) {
        return Some(container.to_string());
    }
    containers
        .values()
        .find(|c| c.name == container)
        .map(|c| c.runtime_id.clone())
}

#[async_trait]
impl ContainerBackend for SimulatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Simulated
    }

    fn provisions_async(&self) -> bool {
        self.async_provisioning
    }

    async fn list(&self, tenant: Option<&str>, with_metrics: bool) -> Result<Vec<LiveContainer>> {
        self.enter("list containers", tenant.unwrap_or("*")).await?;
        let containers = self.containers.lock();
        let mut live: Vec<LiveContainer> = containers
            .values()
            .filter(|c| {
                tenant.is_none() || tenant_from_labels(&c.labels).as_deref() == tenant
            })
            .map(|c| LiveContainer {
                runtime_id: c.runtime_id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                runtime_status: c.state.clone(),
                created: Some(c.created),
                ports: c.ports.clone(),
                networks: vec!["bridge".to_string()],
                tenant: tenant_from_labels(&c.labels),
                labels: c.labels.clone(),
                url: c.url.clone(),
                metrics: (with_metrics && c.state == "running")
                    .then(|| ContainerStats::zeroed(&c.runtime_id)),
            })
            .collect();
        live.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(live)
    }

    async fn create(&self, container: &ManagedContainer) -> Result<Provisioned> {
        self.enter("create container", &container.id).await?;

        let runtime_id = self.allocate_id();
        let mut containers = self.containers.lock();
        if containers.values().any(|c| c.name == container.id) {
            return Err(Error::backend(
                "create container",
                format!("Conflict. The container name \"/{}\" is already in use", container.id),
            ));
        }

        let url = container.ports.first().map(|p| {
            let host_port = p
                .host_port
                .map(u64::from)
                .unwrap_or(FIRST_HOST_PORT + self.next_id.load(Ordering::SeqCst));
            format!("http://localhost:{}", host_port)
        });

        containers.insert(
            runtime_id.clone(),
            SimContainer {
                runtime_id: runtime_id.clone(),
                name: container.id.clone(),
                image: container.image.clone(),
                state: "running".to_string(),
                created: Utc::now(),
                labels: platform_labels(container),
                ports: container.ports.clone(),
                url: url.clone(),
            },
        );

        Ok(Provisioned { runtime_id, url })
    }

    async fn start(&self, container: &str) -> Result<()> {
        self.enter("start container", container).await?;
        self.with_container("start container", container, |c| {
            c.state = "running".to_string();
        })
    }

    async fn stop(&self, container: &str) -> Result<()> {
        self.enter("stop container", container).await?;
        self.with_container("stop container", container, |c| {
            if c.state != "created" {
                c.state = "exited".to_string();
            }
        })
    }

    async fn remove(&self, container: &str) -> Result<()> {
        self.enter("remove container", container).await?;
        let mut containers = self.containers.lock();
        if let Some(key) = find_key(&containers, container) {
            containers.remove(&key);
        }
        Ok(())
    }

    async fn logs(&self, container: &str, tail: usize) -> Result<Vec<String>> {
        self.enter("fetch logs", container).await?;
        let name = self.with_container("fetch logs", container, |c| c.name.clone())?;
        let lines = vec![
            format!("[simulated] {} container started", name),
            format!("[simulated] {} application ready", name),
            format!("[simulated] {} listening on port 80", name),
        ];
        let skip = lines.len().saturating_sub(tail);
        Ok(lines.into_iter().skip(skip).collect())
    }

    async fn stats(&self, container: &str) -> Result<ContainerStats> {
        self.enter("read stats", container).await?;
        Ok(ContainerStats::zeroed(container))
    }
}
