use crate::backend::ContainerBackend;
use crate::config::Config;
use crate::container::{
    predefined_spec, ActivityEntry, Caller, ContainerSpec, ContainerStats, ManagedContainer,
    ServiceType, Status,
};
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::reconcile::{ContainerView, DemoSeeding, Reconciler};
use crate::state::{ContainerRepository, Store};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// Default number of log lines returned by `logs`.
pub const DEFAULT_LOG_TAIL: usize = 100;

/// Default number of activity entries returned by `recent_activity`.
pub const DEFAULT_ACTIVITY_LIMIT: usize = 50;

/// A state-changing operation on an existing container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Remove,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Remove => "remove",
        }
    }

    /// Status persisted while the backend call is in flight.
    pub fn intermediate(&self) -> Status {
        match self {
            Action::Start | Action::Restart => Status::Starting,
            Action::Stop => Status::Stopping,
            Action::Remove => Status::Removing,
        }
    }

    /// Status persisted on success. `None` means the row is deleted.
    pub fn terminal(&self) -> Option<Status> {
        match self {
            Action::Start | Action::Restart => Some(Status::Running),
            Action::Stop => Some(Status::Stopped),
            Action::Remove => None,
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            Action::Start => "start container",
            Action::Stop => "stop container",
            Action::Restart => "restart container",
            Action::Remove => "remove container",
        }
    }
}

/// Lifecycle coordinator for tenant containers.
///
/// Every state change follows the same sequence: take the container's lock,
/// load and authorize the row, persist the intermediate status, call the
/// backend under a deadline, then persist the terminal status (or `error`)
/// and append an activity entry. The lock is held until the row is final, so
/// two operations on one container never interleave.
///
/// Backends that provision asynchronously get their `create` finished by a
/// tracked background task; [`Orchestrator::shutdown`] cancels and awaits
/// those, [`Orchestrator::drain`] only awaits them.
///
/// # Example
///
/// ```no_run
/// use cloudport::backend::SimulatedBackend;
/// use cloudport::container::{Caller, ServiceType};
/// use cloudport::{Config, Orchestrator};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), cloudport::Error> {
/// let orchestrator = Orchestrator::builder()
///     .config(Config::default())
///     .backend(Arc::new(SimulatedBackend::new()))
///     .in_memory()
///     .build()
///     .await?;
///
/// let caller = Caller::client("alice", "acme");
/// let row = orchestrator
///     .create_predefined(&caller, ServiceType::WebServer, None)
///     .await?;
/// orchestrator.stop(&caller, &row.id).await?;
/// orchestrator.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    pub(super) config: Config,
    pub(super) store: Store,
    pub(super) containers: ContainerRepository,
    pub(super) backend: Arc<dyn ContainerBackend>,
    pub(super) locks: KeyedLocks,
    reconciler: Reconciler,
    pub(super) cleanup_pattern: regex::Regex,
    /// Deadline for start/stop/restart/remove/logs/stats backend calls.
    pub backend_timeout: Duration,
    /// Deadline for `create`, including background provisioning.
    pub provision_timeout: Duration,
    pub(super) cancellation_token: CancellationToken,
    pub(super) tasks: TaskTracker,
}

impl Orchestrator {
    /// Create a builder. The builder opens and initializes the store.
    pub fn builder() -> super::OrchestratorBuilder {
        super::OrchestratorBuilder::new()
    }

    pub(super) fn new(
        config: Config,
        store: Store,
        backend: Arc<dyn ContainerBackend>,
        backend_timeout: Duration,
        provision_timeout: Duration,
    ) -> Result<Self> {
        let cleanup_pattern = regex::Regex::new(&config.cleanup.pattern).map_err(|e| {
            Error::Config(format!(
                "invalid cleanup.pattern '{}': {}",
                config.cleanup.pattern, e
            ))
        })?;
        let containers = ContainerRepository::new(store.clone());
        let locks = KeyedLocks::new();
        let reconciler = Reconciler::new(
            containers.clone(),
            Arc::clone(&backend),
            locks.clone(),
            backend_timeout,
            DemoSeeding {
                enabled: config.demo.seed_on_empty,
                known_tenants: config.tenants.clone(),
            },
        );

        Ok(Self {
            config,
            store,
            containers,
            backend,
            locks,
            reconciler,
            cleanup_pattern,
            backend_timeout,
            provision_timeout,
            cancellation_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn ContainerBackend> {
        &self.backend
    }

    /// Number of background provisioning tasks still running.
    pub fn pending_provisions(&self) -> usize {
        self.tasks.len()
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Create a container from an explicit spec.
    ///
    /// Clients always create in their own tenant; admins may name any tenant.
    /// On synchronous backends the returned row is final (`running`); on
    /// asynchronous ones it is `creating` and finishes in the background.
    pub async fn create(
        &self,
        caller: &Caller,
        mut spec: ContainerSpec,
    ) -> Result<ManagedContainer> {
        if !caller.is_admin() {
            spec.tenant = caller.scope(None)?.unwrap_or_default();
        }
        spec.validate()?;

        let id = spec.container_id();
        self.create_impl(caller, spec)
            .instrument(tracing::info_span!("create", container.id = %id, actor = %caller.user))
            .await
    }

    async fn create_impl(&self, caller: &Caller, spec: ContainerSpec) -> Result<ManagedContainer> {
        let row = ManagedContainer::from_spec(&spec);
        let guard = self.locks.lock(&row.id).await;

        if self.containers.get(&row.id).await?.is_some() {
            return Err(Error::Conflict(row.id));
        }
        let row = self.containers.insert(&row).await?;
        tracing::info!("Created row for {} ({}), provisioning", row.id, row.image);

        if self.backend.provisions_async() {
            let detail = json!({ "image": row.image, "async": true });
            self.record(caller, Some(&row.id), "create", detail).await;
            self.spawn_provision(caller.clone(), row.clone(), guard);
            return Ok(row);
        }

        let result = with_deadline(
            &self.cancellation_token,
            "create container",
            self.provision_timeout,
            self.backend.create(&row),
        )
        .await;

        match result {
            Ok(provisioned) => {
                let row = self
                    .containers
                    .mark_provisioned(
                        &row.id,
                        &provisioned.runtime_id,
                        provisioned.url.as_deref(),
                        Status::Running,
                    )
                    .await?
                    .ok_or_else(|| Error::NotFound(row.id.clone()))?;
                tracing::info!("{} is running at {}", row.id, row.url.as_deref().unwrap_or("-"));
                self.record(
                    caller,
                    Some(&row.id),
                    "create",
                    json!({ "image": row.image, "runtime_id": row.runtime_id, "url": row.url }),
                )
                .await;
                Ok(row)
            }
            Err(e) => {
                self.fail(caller, &row.id, "create", &e).await;
                Err(e)
            }
        }
    }

    /// Create a container from the built-in template for `service_type`.
    pub async fn create_predefined(
        &self,
        caller: &Caller,
        service_type: ServiceType,
        tenant: Option<&str>,
    ) -> Result<ManagedContainer> {
        let tenant = if caller.is_admin() {
            tenant.map(str::to_string).ok_or_else(|| {
                Error::Validation("admins must name the tenant to create for".to_string())
            })?
        } else {
            caller.scope(None)?.unwrap_or_default()
        };
        let spec = predefined_spec(service_type, &tenant)?;
        self.create(caller, spec).await
    }

    // ========================================================================
    // State changes on existing containers
    // ========================================================================

    pub async fn start(&self, caller: &Caller, id: &str) -> Result<ManagedContainer> {
        self.transition(caller, id, Action::Start)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub async fn stop(&self, caller: &Caller, id: &str) -> Result<ManagedContainer> {
        self.transition(caller, id, Action::Stop)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub async fn restart(&self, caller: &Caller, id: &str) -> Result<ManagedContainer> {
        self.transition(caller, id, Action::Restart)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Remove the container from the backend, then delete its row.
    pub async fn remove(&self, caller: &Caller, id: &str) -> Result<()> {
        self.transition(caller, id, Action::Remove).await.map(|_| ())
    }

    /// Run `action` on container `id` under its lock.
    ///
    /// Returns the row as it was left when the lock was released, or `None`
    /// after a removal.
    pub async fn transition(
        &self,
        caller: &Caller,
        id: &str,
        action: Action,
    ) -> Result<Option<ManagedContainer>> {
        self.transition_impl(caller, id, action)
            .instrument(tracing::info_span!(
                "transition",
                action = action.as_str(),
                container.id = %id,
                actor = %caller.user
            ))
            .await
    }

    async fn transition_impl(
        &self,
        caller: &Caller,
        id: &str,
        action: Action,
    ) -> Result<Option<ManagedContainer>> {
        let _guard = self.locks.lock(id).await;
        let row = self.authorized(caller, id).await?;
        let previous = row.status;

        self.containers.set_status(id, action.intermediate()).await?;

        let backend_ref = row.backend_ref().to_string();
        let call = async {
            match action {
                Action::Start => self.backend.start(&backend_ref).await,
                Action::Stop => self.backend.stop(&backend_ref).await,
                Action::Restart => self.backend.restart(&backend_ref).await,
                Action::Remove => self.backend.remove(&backend_ref).await,
            }
        };
        let result = with_deadline(
            &self.cancellation_token,
            action.operation(),
            self.backend_timeout,
            call,
        )
        .await;

        if let Err(e) = result {
            self.fail(caller, id, action.as_str(), &e).await;
            return Err(e);
        }

        let settled = match action.terminal() {
            Some(status) => {
                let row = self
                    .containers
                    .set_status(id, status)
                    .await?
                    .ok_or_else(|| Error::NotFound(id.to_string()))?;
                tracing::info!("{} {} -> {}", id, previous, status);
                Some(row)
            }
            None => {
                self.containers.delete(id).await?;
                tracing::info!("{} removed", id);
                None
            }
        };
        self.record(
            caller,
            Some(id),
            action.as_str(),
            json!({ "from": previous.as_str(), "runtime_id": row.runtime_id }),
        )
        .await;
        Ok(settled)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Containers visible to `caller`, reconciled with the backend.
    ///
    /// Clients always see only their own tenant; admins see `tenant` or,
    /// when `None`, every tenant.
    pub async fn list(
        &self,
        caller: &Caller,
        tenant: Option<&str>,
        with_metrics: bool,
    ) -> Result<Vec<ContainerView>> {
        let scope = caller.scope(tenant)?;
        self.reconciler
            .list(scope.as_deref(), with_metrics)
            .instrument(tracing::info_span!("list", tenant = ?scope, actor = %caller.user))
            .await
    }

    /// One container, with live details when the backend can supply them.
    pub async fn describe(&self, caller: &Caller, id: &str) -> Result<ContainerView> {
        let row = self.authorized(caller, id).await?;
        let live = match with_deadline(
            &self.cancellation_token,
            "list containers",
            self.backend_timeout,
            self.backend.list(Some(&row.tenant_id), false),
        )
        .await
        {
            Ok(live) => live.into_iter().find(|l| {
                row.runtime_id.as_deref() == Some(l.runtime_id.as_str()) || l.name == row.id
            }),
            Err(e) => {
                tracing::warn!("Could not read live state of {}: {}", id, e);
                None
            }
        };
        Ok(ContainerView::from_row(row, live.as_ref()))
    }

    /// The last `tail` log lines.
    ///
    /// A container that is still provisioning yields a placeholder line
    /// instead of an error.
    pub async fn logs(&self, caller: &Caller, id: &str, tail: usize) -> Result<Vec<String>> {
        let row = self.authorized(caller, id).await?;
        let result = with_deadline(
            &self.cancellation_token,
            "fetch logs",
            self.backend_timeout,
            self.backend.logs(row.backend_ref(), tail),
        )
        .await;

        match result {
            Ok(lines) => Ok(lines),
            Err(e) if row.status == Status::Creating => {
                tracing::debug!("Logs for {} not available yet: {}", id, e);
                Ok(vec![format!(
                    "Container {} is still being provisioned; logs are not available yet.",
                    id
                )])
            }
            Err(e) => Err(e),
        }
    }

    /// Point-in-time resource usage. Never fails once access is granted:
    /// backend errors produce a zeroed snapshot.
    pub async fn stats(&self, caller: &Caller, id: &str) -> Result<ContainerStats> {
        let row = self.authorized(caller, id).await?;
        let result = with_deadline(
            &self.cancellation_token,
            "read stats",
            self.backend_timeout,
            self.backend.stats(row.backend_ref()),
        )
        .await;

        Ok(result.unwrap_or_else(|e| {
            tracing::warn!("Stats for {} unavailable, reporting zeros: {}", id, e);
            ContainerStats::zeroed(row.backend_ref())
        }))
    }

    /// Activity entries, newest first. Clients only see their own tenant's.
    pub async fn recent_activity(
        &self,
        caller: &Caller,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>> {
        let scope = caller.scope(None)?;
        self.store.recent_activity(limit, scope.as_deref()).await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Load row `id` and check that `caller` may operate on it.
    pub(super) async fn authorized(&self, caller: &Caller, id: &str) -> Result<ManagedContainer> {
        let row = self
            .containers
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if !caller.can_access(&row) {
            tracing::warn!("{} denied access to {}", caller.user, id);
            return Err(Error::Forbidden {
                user: caller.user.clone(),
                container: id.to_string(),
            });
        }
        Ok(row)
    }

    /// Mark `id` as failed and log why. Never fails itself.
    pub(super) async fn fail(&self, caller: &Caller, id: &str, action: &str, err: &Error) {
        tracing::error!("{} failed for {}: {}", action, id, err);
        if let Err(e) = self.containers.set_status(id, Status::Error).await {
            tracing::warn!("Could not mark {} as error: {}", id, e);
        }
        self.record(
            caller,
            Some(id),
            &format!("{}_failed", action),
            json!({ "error": err.to_string() }),
        )
        .await;
    }

    /// Append an activity entry. Failures are logged, not returned.
    pub(super) async fn record(
        &self,
        caller: &Caller,
        target: Option<&str>,
        action: &str,
        detail: Value,
    ) {
        record_activity(&self.store, caller, target, action, detail).await;
    }
}

pub(super) async fn record_activity(
    store: &Store,
    caller: &Caller,
    target: Option<&str>,
    action: &str,
    detail: Value,
) {
    if let Err(e) = store
        .log_activity(&caller.user, caller.tenant.as_deref(), target, action, detail)
        .await
    {
        tracing::warn!("Failed to record {} activity: {}", action, e);
    }
}

/// Run a backend call with a deadline, giving up early on cancellation.
pub(super) async fn with_deadline<T>(
    cancel: &CancellationToken,
    operation: &str,
    timeout: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            Err(Error::Cancelled(operation.to_string()))
        }

        result = tokio::time::timeout(timeout, call) => {
            match result {
                Ok(inner) => inner,
                Err(_elapsed) => Err(Error::Timeout {
                    operation: operation.to_string(),
                    after: timeout,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_map_to_statuses() {
        assert_eq!(Action::Start.intermediate(), Status::Starting);
        assert_eq!(Action::Start.terminal(), Some(Status::Running));
        assert_eq!(Action::Stop.intermediate(), Status::Stopping);
        assert_eq!(Action::Stop.terminal(), Some(Status::Stopped));
        assert_eq!(Action::Restart.intermediate(), Status::Starting);
        assert_eq!(Action::Remove.intermediate(), Status::Removing);
        assert_eq!(Action::Remove.terminal(), None);
    }

    #[tokio::test]
    async fn deadline_reports_timeout() {
        let token = CancellationToken::new();
        let result: Result<()> =
            with_deadline(&token, "start container", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(Error::Timeout { ref operation, .. }) if operation == "start container"
        ));
    }

    #[tokio::test]
    async fn deadline_prefers_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result =
            with_deadline(&token, "create container", Duration::from_secs(1), async { Ok(1) })
                .await;
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }
}
