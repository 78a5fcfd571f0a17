use crate::container::Status;
use crate::error::{Error, Result};
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

const SCHEMA_VERSION: i32 = 1;

/// One row, column name to JSON value. JSON-typed columns hold structured
/// values (arrays, objects) rather than their text encoding.
pub type Record = serde_json::Map<String, Value>;

type RawRow = Vec<(String, SqlValue)>;

/// Tables reachable through the generic API. Identifiers in generated SQL
/// only ever come from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Containers,
    ActivityLog,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Containers => "containers",
            Table::ActivityLog => "activity_log",
        }
    }

    pub fn key_column(&self) -> &'static str {
        "id"
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Containers => &[
                "id",
                "name",
                "runtime_id",
                "tenant_id",
                "image",
                "service_type",
                "ports",
                "environment",
                "labels",
                "command",
                "status",
                "url",
                "created_at",
                "updated_at",
            ],
            Table::ActivityLog => &[
                "id",
                "actor",
                "actor_tenant",
                "target",
                "action",
                "detail",
                "timestamp",
            ],
        }
    }

    fn json_columns(&self) -> &'static [&'static str] {
        match self {
            Table::Containers => &["ports", "environment", "labels", "command"],
            Table::ActivityLog => &["detail"],
        }
    }

    /// Columns an update may never touch.
    fn immutable_columns(&self) -> &'static [&'static str] {
        match self {
            Table::Containers => &["id", "tenant_id", "created_at"],
            // The activity log is append-only.
            Table::ActivityLog => self.columns(),
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            Table::Containers => "created_at ASC, id ASC",
            Table::ActivityLog => "id DESC",
        }
    }

    fn check_column(&self, column: &str) -> Result<&'static str> {
        self.columns()
            .iter()
            .copied()
            .find(|c| *c == column)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "unknown column '{}' for table '{}'",
                    column,
                    self.name()
                ))
            })
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "containers" => Ok(Table::Containers),
            "activity_log" => Ok(Table::ActivityLog),
            other => Err(Error::Validation(format!("unknown table '{}'", other))),
        }
    }
}

/// SQLite-backed store for containers and the activity log.
///
/// Cheap to clone; clones share one connection thread. Every method is a
/// single statement, so each write is atomic on its own and nothing is held
/// open across a backend call.
#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
    conn: Connection,
}

impl Store {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let conn = Connection::open(&db_path).await?;

        // WAL for concurrent readers while the orchestrator writes
        conn.call(|conn: &mut rusqlite::Connection| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        })
        .await?;

        Ok(Self { db_path, conn })
    }

    /// Create an ephemeral in-memory store.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open(":memory:").await?;

        conn.call(|conn: &mut rusqlite::Connection| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        })
        .await?;

        Ok(Self {
            db_path: PathBuf::from(":memory:"),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Create the schema, or check and migrate an existing one.
    pub async fn initialize(&self) -> Result<()> {
        let schema_exists: bool = self
            .conn
            .call(
                |conn: &mut rusqlite::Connection| -> tokio_rusqlite::Result<bool> {
                    Ok(conn.query_row(
                        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
                        [],
                        |row| row.get(0),
                    )?)
                },
            )
            .await?;

        if !schema_exists {
            debug!("Creating SQLite schema at {}", self.db_path.display());
            self.create_schema().await
        } else {
            self.run_migrations().await
        }
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version: i32 = self
            .conn
            .call(
                |conn: &mut rusqlite::Connection| -> tokio_rusqlite::Result<i32> {
                    Ok(conn.query_row(
                        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                        [],
                        |row| row.get(0),
                    )?)
                },
            )
            .await?;

        if current_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "database {} uses schema version {}, newer than this build supports ({})",
                self.db_path.display(),
                current_version,
                SCHEMA_VERSION
            )));
        }
        if current_version == SCHEMA_VERSION {
            debug!("Database schema is up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating database schema from version {} to {}",
            current_version, SCHEMA_VERSION
        );
        // Version 0 means the version row was lost; the tables are created
        // with IF NOT EXISTS so re-running the initial schema is safe.
        self.create_schema().await
    }

    async fn create_schema(&self) -> Result<()> {
        let statuses = Status::ALL
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS containers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                runtime_id TEXT,
                tenant_id TEXT NOT NULL,
                image TEXT NOT NULL,
                service_type TEXT NOT NULL,
                ports TEXT NOT NULL DEFAULT '[]',
                environment TEXT NOT NULL DEFAULT '{{}}',
                labels TEXT NOT NULL DEFAULT '{{}}',
                command TEXT,
                status TEXT NOT NULL CHECK (status IN ({statuses})),
                url TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_containers_tenant ON containers(tenant_id);
            CREATE INDEX IF NOT EXISTS idx_containers_runtime_id ON containers(runtime_id)
                WHERE runtime_id IS NOT NULL;

            -- No foreign key on target: entries outlive removed containers
            CREATE TABLE IF NOT EXISTS activity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor TEXT NOT NULL,
                actor_tenant TEXT,
                target TEXT,
                action TEXT NOT NULL,
                detail TEXT NOT NULL DEFAULT '{{}}',
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_activity_tenant ON activity_log(actor_tenant, id);
            "#
        );

        self.conn
            .call(move |conn: &mut rusqlite::Connection| -> tokio_rusqlite::Result<()> {
                let tx = conn.transaction()?;
                tx.execute_batch(&ddl)?;
                tx.execute(
                    "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
                    rusqlite::params![SCHEMA_VERSION],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    // ========================================================================
    // Generic table API
    // ========================================================================

    /// First row matching every `column = value` condition.
    pub async fn find_one(&self, table: Table, conditions: &Record) -> Result<Option<Record>> {
        Ok(self
            .find_many(table, conditions, Some(1))
            .await?
            .into_iter()
            .next())
    }

    /// Rows matching every condition, in the table's natural order.
    pub async fn find_many(
        &self,
        table: Table,
        conditions: &Record,
        limit: Option<usize>,
    ) -> Result<Vec<Record>> {
        let (where_sql, params) = where_clause(table, conditions)?;
        let mut sql = format!(
            "SELECT * FROM {}{} ORDER BY {}",
            table.name(),
            where_sql,
            table.order_by()
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = self.query(sql, params).await?;
        rows.into_iter().map(|raw| decode_row(table, raw)).collect()
    }

    /// Insert a row and return it as stored.
    pub async fn insert(&self, table: Table, record: &Record) -> Result<Record> {
        if record.is_empty() {
            return Err(Error::Validation(format!(
                "nothing to insert into '{}'",
                table
            )));
        }
        let mut columns = Vec::with_capacity(record.len());
        let mut params = Vec::with_capacity(record.len());
        for (column, value) in record {
            let column = table.check_column(column)?;
            columns.push(column);
            params.push(encode_value(table, column, value));
        }

        let placeholders = (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            table.name(),
            columns.join(", "),
            placeholders
        );

        let key = record
            .get(table.key_column())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let rows = self
            .query(sql, params)
            .await
            .map_err(|e| write_error(table, &key, e))?;
        let raw = rows.into_iter().next().ok_or_else(|| Error::CorruptRecord {
            table: table.name().to_string(),
            reason: "insert returned no row".to_string(),
        })?;
        decode_row(table, raw)
    }

    /// Update columns of the row with key `key`; `None` if there is no such row.
    ///
    /// The key column and `tenant_id` can never be changed.
    pub async fn update(&self, table: Table, key: &str, record: &Record) -> Result<Option<Record>> {
        let mut assignments = Vec::with_capacity(record.len() + 1);
        let mut params = Vec::with_capacity(record.len() + 2);
        for (column, value) in record {
            let column = table.check_column(column)?;
            if table.immutable_columns().contains(&column) {
                return Err(Error::Validation(format!(
                    "column '{}' of '{}' cannot be updated",
                    column, table
                )));
            }
            params.push(encode_value(table, column, value));
            assignments.push(format!("{} = ?{}", column, params.len()));
        }
        if assignments.is_empty() {
            return Err(Error::Validation(format!("nothing to update in '{}'", table)));
        }
        if table == Table::Containers && !record.contains_key("updated_at") {
            params.push(SqlValue::Text(Utc::now().to_rfc3339()));
            assignments.push(format!("updated_at = ?{}", params.len()));
        }
        params.push(SqlValue::Text(key.to_string()));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{} RETURNING *",
            table.name(),
            assignments.join(", "),
            table.key_column(),
            params.len()
        );

        let rows = self
            .query(sql, params)
            .await
            .map_err(|e| write_error(table, key, e))?;
        rows.into_iter()
            .next()
            .map(|raw| decode_row(table, raw))
            .transpose()
    }

    /// Delete the row with key `key`. Returns whether a row was removed.
    pub async fn delete(&self, table: Table, key: &str) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            table.name(),
            table.key_column()
        );
        let key = key.to_string();
        debug!(%sql, "execute");
        let removed = self
            .conn
            .call(move |conn: &mut rusqlite::Connection| -> tokio_rusqlite::Result<usize> {
                Ok(conn.execute(&sql, [key])?)
            })
            .await?;
        Ok(removed > 0)
    }

    async fn query(&self, sql: String, params: Vec<SqlValue>) -> Result<Vec<RawRow>> {
        debug!(%sql, "query");
        let rows = self
            .conn
            .call(move |conn: &mut rusqlite::Connection| -> tokio_rusqlite::Result<Vec<RawRow>> {
                let mut stmt = conn.prepare(&sql)?;
                let names: Vec<String> =
                    stmt.column_names().into_iter().map(String::from).collect();
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                        let mut out = Vec::with_capacity(names.len());
                        for (i, name) in names.iter().enumerate() {
                            out.push((name.clone(), row.get::<_, SqlValue>(i)?));
                        }
                        Ok(out)
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

fn where_clause(table: Table, conditions: &Record) -> Result<(String, Vec<SqlValue>)> {
    let mut clauses = Vec::with_capacity(conditions.len());
    let mut params = Vec::with_capacity(conditions.len());
    for (column, value) in conditions {
        let column = table.check_column(column)?;
        if value.is_null() {
            clauses.push(format!("{} IS NULL", column));
        } else {
            params.push(encode_value(table, column, value));
            clauses.push(format!("{} = ?{}", column, params.len()));
        }
    }
    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    Ok((sql, params))
}

/// Convert a JSON value to its stored form for `column`.
fn encode_value(table: Table, column: &str, value: &Value) -> SqlValue {
    if value.is_null() {
        return SqlValue::Null;
    }
    if table.json_columns().contains(&column) {
        return SqlValue::Text(value.to_string());
    }
    if table == Table::Containers && column == "status" {
        let canonical = value
            .as_str()
            .and_then(|s| s.parse::<Status>().ok())
            .unwrap_or_else(|| {
                warn!("Refusing non-canonical status {}, storing 'error'", value);
                Status::Error
            });
        return SqlValue::Text(canonical.as_str().to_string());
    }
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn decode_row(table: Table, raw: RawRow) -> Result<Record> {
    let mut record = Record::new();
    for (column, value) in raw {
        let json = match value {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::from(i),
            SqlValue::Real(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Text(text) if table.json_columns().contains(&column.as_str()) => {
                serde_json::from_str(&text).map_err(|e| Error::CorruptRecord {
                    table: table.name().to_string(),
                    reason: format!("column '{}' is not valid JSON: {}", column, e),
                })?
            }
            SqlValue::Text(text) => Value::String(text),
            SqlValue::Blob(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        };
        record.insert(column, json);
    }
    Ok(record)
}

fn write_error(table: Table, key: &str, err: Error) -> Error {
    if let Error::Persistence(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
        code,
        message,
    ))) = &err
    {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            return match code.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => Error::Conflict(key.to_string()),
                _ => Error::Validation(format!(
                    "rejected by '{}': {}",
                    table,
                    message.as_deref().unwrap_or("constraint violation")
                )),
            };
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn container_row(id: &str, tenant: &str) -> Record {
        let now = Utc::now().to_rfc3339();
        record(json!({
            "id": id,
            "name": id,
            "tenant_id": tenant,
            "image": "nginx:alpine",
            "service_type": "web-server",
            "ports": [{ "container_port": 80, "host_port": null, "protocol": "tcp" }],
            "environment": { "CLIENT_ID": tenant },
            "labels": {},
            "status": "creating",
            "created_at": now,
            "updated_at": now,
        }))
    }

    async fn store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn insert_returns_stored_row_with_structured_json() {
        let store = store().await;
        let row = store
            .insert(Table::Containers, &container_row("t1-web", "t1"))
            .await
            .unwrap();
        assert_eq!(row["status"], json!("creating"));
        assert_eq!(row["ports"][0]["container_port"], json!(80));
        assert_eq!(row["environment"]["CLIENT_ID"], json!("t1"));
        assert_eq!(row["runtime_id"], Value::Null);
    }

    #[tokio::test]
    async fn duplicate_key_is_conflict() {
        let store = store().await;
        store
            .insert(Table::Containers, &container_row("t1-web", "t1"))
            .await
            .unwrap();
        let err = store
            .insert(Table::Containers, &container_row("t1-web", "t1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(ref id) if id == "t1-web"));
    }

    #[tokio::test]
    async fn unknown_columns_are_rejected() {
        let store = store().await;
        let mut row = container_row("t1-web", "t1");
        row.insert("owner; DROP TABLE containers".to_string(), json!("x"));
        assert!(matches!(
            store.insert(Table::Containers, &row).await,
            Err(Error::Validation(_))
        ));

        let conditions = record(json!({ "nope": 1 }));
        assert!(store
            .find_many(Table::Containers, &conditions, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn tenant_and_key_are_immutable() {
        let store = store().await;
        store
            .insert(Table::Containers, &container_row("t1-web", "t1"))
            .await
            .unwrap();

        for change in [json!({ "tenant_id": "t2" }), json!({ "id": "other" })] {
            let err = store
                .update(Table::Containers, "t1-web", &record(change))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }

        let row = store
            .find_one(Table::Containers, &record(json!({ "id": "t1-web" })))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["tenant_id"], json!("t1"));
    }

    #[tokio::test]
    async fn non_canonical_status_is_stored_as_error() {
        let store = store().await;
        store
            .insert(Table::Containers, &container_row("t1-web", "t1"))
            .await
            .unwrap();
        let row = store
            .update(
                Table::Containers,
                "t1-web",
                &record(json!({ "status": "exited" })),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["status"], json!("error"));
    }

    #[tokio::test]
    async fn update_and_delete_missing_rows() {
        let store = store().await;
        let updated = store
            .update(
                Table::Containers,
                "ghost",
                &record(json!({ "status": "running" })),
            )
            .await
            .unwrap();
        assert!(updated.is_none());
        assert!(!store.delete(Table::Containers, "ghost").await.unwrap());
    }

    #[tokio::test]
    async fn find_many_filters_and_limits() {
        let store = store().await;
        for (id, tenant) in [("t1-a", "t1"), ("t1-b", "t1"), ("t2-a", "t2")] {
            store
                .insert(Table::Containers, &container_row(id, tenant))
                .await
                .unwrap();
        }
        let t1 = store
            .find_many(Table::Containers, &record(json!({ "tenant_id": "t1" })), None)
            .await
            .unwrap();
        assert_eq!(t1.len(), 2);

        let all = store
            .find_many(Table::Containers, &Record::new(), Some(2))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let unprovisioned = store
            .find_many(
                Table::Containers,
                &record(json!({ "runtime_id": null })),
                None,
            )
            .await
            .unwrap();
        assert_eq!(unprovisioned.len(), 3);
    }

    #[tokio::test]
    async fn activity_log_is_append_only() {
        let store = store().await;
        let entry = store
            .insert(
                Table::ActivityLog,
                &record(json!({
                    "actor": "admin",
                    "action": "start",
                    "detail": { "k": "v" },
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            )
            .await
            .unwrap();
        let id = entry["id"].as_i64().unwrap();
        assert!(store
            .update(
                Table::ActivityLog,
                &id.to_string(),
                &record(json!({ "action": "stop" }))
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cloudport.db");
        {
            let store = Store::open(&path).await.unwrap();
            store.initialize().await.unwrap();
            store
                .insert(Table::Containers, &container_row("t1-web", "t1"))
                .await
                .unwrap();
        }
        let store = Store::open(&path).await.unwrap();
        store.initialize().await.unwrap();
        let rows = store
            .find_many(Table::Containers, &Record::new(), None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn table_names_parse() {
        assert_eq!("containers".parse::<Table>().unwrap(), Table::Containers);
        assert!("users".parse::<Table>().is_err());
    }
}
