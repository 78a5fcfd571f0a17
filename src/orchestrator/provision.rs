//! Background completion of `create` on asynchronously provisioning backends.

use super::core::{record_activity, with_deadline};
use super::Orchestrator;
use crate::container::{Caller, ManagedContainer, Status};
use crate::error::Error;
use crate::locks::KeyGuard;
use serde_json::json;
use std::sync::Arc;
use tracing::Instrument;

impl Orchestrator {
    /// Finish provisioning `row` on a tracked task.
    ///
    /// The task owns the container's lock until the row reaches `running` or
    /// `error`, so lifecycle operations issued meanwhile wait for it.
    pub(super) fn spawn_provision(&self, caller: Caller, row: ManagedContainer, guard: KeyGuard) {
        let backend = Arc::clone(&self.backend);
        let containers = self.containers.clone();
        let store = self.store.clone();
        let cancel = self.cancellation_token.clone();
        let timeout = self.provision_timeout;
        let span = tracing::info_span!("provision", container.id = %row.id, actor = %caller.user);

        self.tasks.spawn(
            async move {
                let _guard = guard;
                let result =
                    with_deadline(&cancel, "create container", timeout, backend.create(&row)).await;

                match result {
                    Ok(provisioned) => {
                        match containers
                            .mark_provisioned(
                                &row.id,
                                &provisioned.runtime_id,
                                provisioned.url.as_deref(),
                                Status::Running,
                            )
                            .await
                        {
                            Ok(Some(_)) => {
                                tracing::info!(
                                    "{} provisioned at {}",
                                    row.id,
                                    provisioned.url.as_deref().unwrap_or("-")
                                );
                                record_activity(
                                    &store,
                                    &caller,
                                    Some(&row.id),
                                    "provisioned",
                                    json!({
                                        "runtime_id": provisioned.runtime_id,
                                        "url": provisioned.url,
                                    }),
                                )
                                .await;
                            }
                            Ok(None) => {
                                tracing::warn!("{} was deleted while provisioning", row.id);
                            }
                            Err(e) => {
                                tracing::error!(
                                    "Could not record provisioning of {}: {}",
                                    row.id,
                                    e
                                );
                            }
                        }
                    }
                    Err(e) => {
                        if matches!(e, Error::Cancelled(_)) {
                            tracing::warn!("Provisioning of {} cancelled", row.id);
                        } else {
                            tracing::error!("Provisioning of {} failed: {}", row.id, e);
                        }
                        if let Err(db) = containers.set_status(&row.id, Status::Error).await {
                            tracing::warn!("Could not mark {} as error: {}", row.id, db);
                        }
                        record_activity(
                            &store,
                            &caller,
                            Some(&row.id),
                            "create_failed",
                            json!({ "error": e.to_string() }),
                        )
                        .await;
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Cancel outstanding provisioning and wait for it to settle.
    ///
    /// Cancelled tasks leave their rows in `error`. Backend calls made after
    /// this fail with `Cancelled`.
    pub async fn shutdown(&self) {
        let pending = self.tasks.len();
        if pending > 0 {
            tracing::info!("Cancelling {} background provisioning task(s)", pending);
        }
        self.cancellation_token.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Wait for outstanding provisioning to finish without cancelling it.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
