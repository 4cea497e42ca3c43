//! SQLite-backed record store for the `create_record` / `update_record` actions.
//!
//! Records are schemaless JSON objects grouped by collection. The stored
//! document always carries its own `id`; updates shallow-merge the changed
//! keys into the existing object.

use chrono::Utc;
use flowdeck_core::workflow::collaborators::{CollaboratorError, CollaboratorFuture, RecordStore};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::format_datetime;
use super::pool::DatabasePool;

#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: DatabasePool,
}

impl SqliteRecordStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Fetch a record by id, or `None` if it does not exist for this tenant.
    pub async fn get_record(
        &self,
        tenant_id: &Uuid,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, CollaboratorError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT data FROM records WHERE id = ? AND tenant_id = ? AND collection = ?",
        )
        .bind(id)
        .bind(tenant_id.to_string())
        .bind(collection)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(storage_error)?;

        row.map(|(data,)| parse_document(&data)).transpose()
    }

    async fn insert(
        &self,
        tenant_id: &Uuid,
        collection: &str,
        data: &Value,
    ) -> Result<Value, CollaboratorError> {
        let mut document = as_object(data, "record data")?;
        let id = match document.get("id").and_then(Value::as_str) {
            Some(existing) if !existing.is_empty() => existing.to_string(),
            _ => Uuid::now_v7().to_string(),
        };
        document.insert("id".to_string(), Value::String(id.clone()));
        let document = Value::Object(document);
        let now = format_datetime(&Utc::now());

        sqlx::query(
            r#"INSERT INTO records (id, tenant_id, collection, data, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(tenant_id.to_string())
        .bind(collection)
        .bind(document.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                CollaboratorError::Failed(format!("record {id} already exists"))
            }
            other => storage_error(other),
        })?;

        tracing::debug!(%tenant_id, collection, record_id = %id, "record created");
        Ok(document)
    }

    async fn merge(
        &self,
        tenant_id: &Uuid,
        collection: &str,
        id: &str,
        changes: &Value,
    ) -> Result<Value, CollaboratorError> {
        let changes = as_object(changes, "record changes")?;
        let Some(existing) = self.get_record(tenant_id, collection, id).await? else {
            return Err(CollaboratorError::NotFound(format!(
                "{collection} record {id}"
            )));
        };

        let mut document = match existing {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in changes {
            // The id is fixed at creation.
            if key != "id" {
                document.insert(key, value);
            }
        }
        let document = Value::Object(document);

        let result = sqlx::query(
            "UPDATE records SET data = ?, updated_at = ? WHERE id = ? AND tenant_id = ? AND collection = ?",
        )
        .bind(document.to_string())
        .bind(format_datetime(&Utc::now()))
        .bind(id)
        .bind(tenant_id.to_string())
        .bind(collection)
        .execute(&self.pool.writer)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(CollaboratorError::NotFound(format!(
                "{collection} record {id}"
            )));
        }

        tracing::debug!(%tenant_id, collection, record_id = id, "record updated");
        Ok(document)
    }
}

impl RecordStore for SqliteRecordStore {
    fn create_record<'a>(
        &'a self,
        tenant_id: &'a Uuid,
        collection: &'a str,
        data: &'a Value,
    ) -> CollaboratorFuture<'a, Value> {
        Box::pin(self.insert(tenant_id, collection, data))
    }

    fn update_record<'a>(
        &'a self,
        tenant_id: &'a Uuid,
        collection: &'a str,
        id: &'a str,
        changes: &'a Value,
    ) -> CollaboratorFuture<'a, Value> {
        Box::pin(self.merge(tenant_id, collection, id, changes))
    }
}

fn as_object(value: &Value, what: &str) -> Result<Map<String, Value>, CollaboratorError> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        other => Err(CollaboratorError::Failed(format!(
            "{what} must be an object, got {other}"
        ))),
    }
}

fn parse_document(data: &str) -> Result<Value, CollaboratorError> {
    serde_json::from_str(data)
        .map_err(|e| CollaboratorError::Failed(format!("corrupt record document: {e}")))
}

fn storage_error(e: sqlx::Error) -> CollaboratorError {
    CollaboratorError::Transport(e.to_string())
}
