use super::sqlite::{Record, Store, Table};
use crate::container::{ManagedContainer, ServiceType, Status};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::warn;

/// Typed access to the `containers` table.
#[derive(Clone)]
pub struct ContainerRepository {
    store: Store,
}

impl ContainerRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn get(&self, id: &str) -> Result<Option<ManagedContainer>> {
        let conditions = record(json!({ "id": id }));
        self.store
            .find_one(Table::Containers, &conditions)
            .await?
            .map(from_record)
            .transpose()
    }

    /// Rows for `tenant`, or every row when `tenant` is `None`, oldest first.
    pub async fn list(&self, tenant: Option<&str>) -> Result<Vec<ManagedContainer>> {
        let mut conditions = Record::new();
        if let Some(tenant) = tenant {
            conditions.insert("tenant_id".to_string(), json!(tenant));
        }
        self.store
            .find_many(Table::Containers, &conditions, None)
            .await?
            .into_iter()
            .map(from_record)
            .collect()
    }

    /// Persist a new row. Fails with `Conflict` if the id is taken.
    pub async fn insert(&self, container: &ManagedContainer) -> Result<ManagedContainer> {
        let row = self
            .store
            .insert(Table::Containers, &to_record(container)?)
            .await?;
        from_record(row)
    }

    pub async fn set_status(&self, id: &str, status: Status) -> Result<Option<ManagedContainer>> {
        let changes = record(json!({ "status": status.as_str() }));
        self.update(id, changes).await
    }

    /// Record the outcome of a successful provisioning call.
    pub async fn mark_provisioned(
        &self,
        id: &str,
        runtime_id: &str,
        url: Option<&str>,
        status: Status,
    ) -> Result<Option<ManagedContainer>> {
        let changes = record(json!({
            "runtime_id": runtime_id,
            "url": url,
            "status": status.as_str(),
        }));
        self.update(id, changes).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.store.delete(Table::Containers, id).await
    }

    async fn update(&self, id: &str, changes: Record) -> Result<Option<ManagedContainer>> {
        self.store
            .update(Table::Containers, id, &changes)
            .await?
            .map(from_record)
            .transpose()
    }
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn to_record(container: &ManagedContainer) -> Result<Record> {
    let value = json!({
        "id": container.id,
        "name": container.name,
        "runtime_id": container.runtime_id,
        "tenant_id": container.tenant_id,
        "image": container.image,
        "service_type": container.service_type.as_str(),
        "ports": serde_json::to_value(&container.ports)?,
        "environment": serde_json::to_value(&container.environment)?,
        "labels": serde_json::to_value(&container.labels)?,
        "command": serde_json::to_value(&container.command)?,
        "status": container.status.as_str(),
        "url": container.url,
        "created_at": container.created_at.to_rfc3339(),
        "updated_at": container.updated_at.to_rfc3339(),
    });
    Ok(record(value))
}

fn from_record(mut row: Record) -> Result<ManagedContainer> {
    let id = text(&row, "id").ok_or_else(|| corrupt("row without id".to_string()))?;

    let status = match text(&row, "status") {
        Some(s) => s.parse::<Status>().unwrap_or_else(|_| {
            warn!("Container {} has unknown status '{}', reading as error", id, s);
            Status::Error
        }),
        None => Status::Error,
    };
    let service_type = text(&row, "service_type")
        .and_then(|s| s.parse::<ServiceType>().ok())
        .unwrap_or(ServiceType::Custom);

    let ports = json_field(&mut row, &id, "ports")?.unwrap_or_default();
    let environment = json_field(&mut row, &id, "environment")?.unwrap_or_default();
    let labels = json_field(&mut row, &id, "labels")?.unwrap_or_default();
    let command = json_field(&mut row, &id, "command")?;

    Ok(ManagedContainer {
        name: text(&row, "name").unwrap_or_else(|| id.clone()),
        runtime_id: text(&row, "runtime_id"),
        tenant_id: text(&row, "tenant_id")
            .ok_or_else(|| corrupt(format!("container {} has no tenant", id)))?,
        image: text(&row, "image").unwrap_or_default(),
        service_type,
        ports,
        environment,
        labels,
        command,
        status,
        url: text(&row, "url"),
        created_at: timestamp(&row, &id, "created_at")?,
        updated_at: timestamp(&row, &id, "updated_at")?,
        id,
    })
}

fn text(row: &Record, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(str::to_string)
}

fn json_field<T: serde::de::DeserializeOwned>(
    row: &mut Record,
    id: &str,
    column: &str,
) -> Result<Option<T>> {
    match row.remove(column) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| corrupt(format!("container {} has malformed {}: {}", id, column, e))),
    }
}

fn timestamp(row: &Record, id: &str, column: &str) -> Result<DateTime<Utc>> {
    text(row, column)
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| corrupt(format!("container {} has an invalid {}", id, column)))
}

fn corrupt(reason: String) -> Error {
    Error::CorruptRecord {
        table: Table::Containers.name().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerSpec, PortMapping};

    async fn repo() -> ContainerRepository {
        let store = Store::open_in_memory().await.unwrap();
        store.initialize().await.unwrap();
        ContainerRepository::new(store)
    }

    fn row(name: &str, tenant: &str) -> ManagedContainer {
        let spec = ContainerSpec::new(name, "nginx:alpine", tenant, ServiceType::WebServer)
            .with_port("80:8080".parse::<PortMapping>().unwrap())
            .with_env("CLIENT_ID", tenant)
            .with_command(vec!["nginx".into(), "-g".into(), "daemon off;".into()]);
        ManagedContainer::from_spec(&spec)
    }

    #[tokio::test]
    async fn insert_and_get_preserve_fields() {
        let repo = repo().await;
        let original = row("web", "t1");
        repo.insert(&original).await.unwrap();

        let loaded = repo.get("t1.web").await.unwrap().unwrap();
        assert_eq!(loaded.ports, original.ports);
        assert_eq!(loaded.environment, original.environment);
        assert_eq!(loaded.command, original.command);
        assert_eq!(loaded.status, Status::Creating);
        assert_eq!(loaded.created_at.timestamp(), original.created_at.timestamp());
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let repo = repo().await;
        repo.insert(&row("web", "t1")).await.unwrap();
        assert!(matches!(
            repo.insert(&row("web", "t1")).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn list_is_scoped_by_tenant() {
        let repo = repo().await;
        repo.insert(&row("a", "t1")).await.unwrap();
        repo.insert(&row("b", "t1")).await.unwrap();
        repo.insert(&row("a", "t2")).await.unwrap();

        assert_eq!(repo.list(Some("t1")).await.unwrap().len(), 2);
        assert_eq!(repo.list(Some("t3")).await.unwrap().len(), 0);
        assert_eq!(repo.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn provisioning_and_status_updates() {
        let repo = repo().await;
        repo.insert(&row("web", "t1")).await.unwrap();

        let updated = repo
            .mark_provisioned("t1.web", "abc123", Some("http://localhost:8080"), Status::Running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.runtime_id.as_deref(), Some("abc123"));
        assert_eq!(updated.backend_ref(), "abc123");
        assert_eq!(updated.status, Status::Running);
        assert!(updated.updated_at >= updated.created_at);

        let stopped = repo.set_status("t1.web", Status::Stopped).await.unwrap().unwrap();
        assert_eq!(stopped.status, Status::Stopped);
        assert_eq!(stopped.url.as_deref(), Some("http://localhost:8080"));

        assert!(repo.set_status("ghost", Status::Running).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_existed() {
        let repo = repo().await;
        repo.insert(&row("web", "t1")).await.unwrap();
        assert!(repo.delete("t1.web").await.unwrap());
        assert!(!repo.delete("t1.web").await.unwrap());
        assert!(repo.get("t1.web").await.unwrap().is_none());
    }
}
