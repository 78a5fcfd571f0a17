use super::sqlite::{Record, Store, Table};
use crate::container::ActivityEntry;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

impl Store {
    /// Append an entry to the activity log and return its id.
    pub async fn log_activity(
        &self,
        actor: &str,
        actor_tenant: Option<&str>,
        target: Option<&str>,
        action: &str,
        detail: Value,
    ) -> Result<i64> {
        let detail = if detail.is_null() { json!({}) } else { detail };
        let record = as_record(json!({
            "actor": actor,
            "actor_tenant": actor_tenant,
            "target": target,
            "action": action,
            "detail": detail,
            "timestamp": Utc::now().to_rfc3339(),
        }));
        let row = self.insert(Table::ActivityLog, &record).await?;
        row.get("id").and_then(Value::as_i64).ok_or_else(|| Error::CorruptRecord {
            table: Table::ActivityLog.name().to_string(),
            reason: "inserted entry has no id".to_string(),
        })
    }

    /// Most recent entries first. With `tenant`, only entries by that tenant's users.
    pub async fn recent_activity(
        &self,
        limit: usize,
        tenant: Option<&str>,
    ) -> Result<Vec<ActivityEntry>> {
        let mut conditions = Record::new();
        if let Some(tenant) = tenant {
            conditions.insert("actor_tenant".to_string(), json!(tenant));
        }
        self.find_many(Table::ActivityLog, &conditions, Some(limit))
            .await?
            .into_iter()
            .map(entry_from_record)
            .collect()
    }
}

fn as_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn entry_from_record(mut record: Record) -> Result<ActivityEntry> {
    let corrupt = |reason: String| Error::CorruptRecord {
        table: Table::ActivityLog.name().to_string(),
        reason,
    };
    let text = |record: &Record, column: &str| -> Option<String> {
        record.get(column).and_then(Value::as_str).map(str::to_string)
    };

    let id = record
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| corrupt("missing id".to_string()))?;
    let timestamp = text(&record, "timestamp")
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| corrupt(format!("entry {} has an invalid timestamp", id)))?;

    Ok(ActivityEntry {
        id,
        actor: text(&record, "actor").unwrap_or_default(),
        actor_tenant: text(&record, "actor_tenant"),
        target: text(&record, "target"),
        action: text(&record, "action").unwrap_or_default(),
        detail: record.remove("detail").unwrap_or(Value::Null),
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn newest_first_and_tenant_scoped() {
        let store = Store::open_in_memory().await.unwrap();
        store.initialize().await.unwrap();

        store
            .log_activity("alice", Some("t1"), Some("t1-web"), "create", json!({}))
            .await
            .unwrap();
        store
            .log_activity("bob", Some("t2"), Some("t2-web"), "create", json!({}))
            .await
            .unwrap();
        store
            .log_activity("alice", Some("t1"), Some("t1-web"), "stop", json!({ "from": "running" }))
            .await
            .unwrap();

        let all = store.recent_activity(10, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].action, "stop");
        assert_eq!(all[0].detail["from"], json!("running"));

        let t1 = store.recent_activity(10, Some("t1")).await.unwrap();
        assert_eq!(t1.len(), 2);
        assert!(t1.iter().all(|e| e.actor == "alice"));

        assert_eq!(store.recent_activity(1, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn entries_outlive_their_target() {
        let store = Store::open_in_memory().await.unwrap();
        store.initialize().await.unwrap();
        let id = store
            .log_activity("root", None, Some("gone"), "remove", Value::Null)
            .await
            .unwrap();
        assert!(id > 0);
        let entries = store.recent_activity(5, None).await.unwrap();
        assert_eq!(entries[0].target.as_deref(), Some("gone"));
        assert_eq!(entries[0].actor_tenant, None);
    }
}
