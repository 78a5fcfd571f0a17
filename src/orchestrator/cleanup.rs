use super::core::with_deadline;
use super::Orchestrator;
use crate::container::Caller;
use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::json;

/// Outcome of a cleanup sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Rows deleted.
    pub removed: Vec<String>,
    /// Rows matching the pattern that were kept because the backend still
    /// runs them or an operation held them.
    pub kept: Vec<String>,
}

impl Orchestrator {
    /// Delete leftover test and simulation rows.
    ///
    /// Only rows whose name matches `cleanup.pattern` and which have no live
    /// resource on the backend are removed. Admin only. When the backend
    /// cannot be listed nothing is removed.
    pub async fn cleanup_test_containers(&self, caller: &Caller) -> Result<CleanupReport> {
        if !caller.is_admin() {
            return Err(Error::Forbidden {
                user: caller.user.clone(),
                container: "*".to_string(),
            });
        }

        let live = with_deadline(
            &self.cancellation_token,
            "list containers",
            self.backend_timeout,
            self.backend.list(None, false),
        )
        .await?;

        let mut report = CleanupReport::default();
        for row in self.containers.list(None).await? {
            if !self.cleanup_pattern.is_match(&row.name) {
                continue;
            }
            let has_live = live.iter().any(|l| {
                row.runtime_id.as_deref() == Some(l.runtime_id.as_str()) || l.name == row.id
            });
            if has_live {
                report.kept.push(row.id);
                continue;
            }
            let Some(_guard) = self.locks.try_lock(&row.id) else {
                report.kept.push(row.id);
                continue;
            };
            if self.containers.delete(&row.id).await? {
                tracing::info!("Cleaned up {} ({})", row.id, row.status);
                report.removed.push(row.id);
            }
        }

        if !report.removed.is_empty() {
            self.record(
                caller,
                None,
                "cleanup",
                json!({ "removed": report.removed, "pattern": self.cleanup_pattern.as_str() }),
            )
            .await;
        }
        Ok(report)
    }
}
