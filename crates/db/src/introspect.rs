//! Schema introspection and the process-wide schema cache.
//!
//! Metadata is fetched once at startup and replaced only by an explicit
//! refresh; agent runs read a shared `Arc<SchemaContext>` snapshot and
//! never see a partially written schema.

use std::sync::Arc;

use sqlx::Row;
use tokio::sync::RwLock;
use tracing::info;

use autoquery_core::{ColumnInfo, SchemaContext, SchemaError};

use crate::connection::DbPool;

/// Fetches table and column metadata for every user table in the
/// warehouse. Fails with `SchemaError::Unavailable` when the warehouse
/// cannot be reached and `SchemaError::EmptyDataset` when it holds no
/// tables.
pub async fn fetch_schema(pool: &DbPool) -> Result<SchemaContext, SchemaError> {
    let table_names: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(|error| SchemaError::Unavailable(error.to_string()))?;

    if table_names.is_empty() {
        return Err(SchemaError::EmptyDataset);
    }

    let mut context = SchemaContext::default();
    for (table,) in table_names {
        let rows = sqlx::query(&format!("PRAGMA table_info(\"{table}\")"))
            .fetch_all(pool)
            .await
            .map_err(|error| SchemaError::Unavailable(error.to_string()))?;

        let columns = rows
            .iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: row
                        .try_get::<String, _>("name")
                        .map_err(|error| SchemaError::Unavailable(error.to_string()))?,
                    sql_type: row
                        .try_get::<String, _>("type")
                        .map_err(|error| SchemaError::Unavailable(error.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;

        context.tables.insert(table, columns);
    }

    Ok(context)
}

/// Process-wide cache around `fetch_schema`. Populated once, shared by
/// all concurrent runs, replaced atomically on `refresh`.
#[derive(Default)]
pub struct SchemaCache {
    inner: RwLock<Option<Arc<SchemaContext>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached schema, loading it on first use.
    pub async fn get_or_load(&self, pool: &DbPool) -> Result<Arc<SchemaContext>, SchemaError> {
        if let Some(context) = self.inner.read().await.as_ref() {
            return Ok(Arc::clone(context));
        }
        self.refresh(pool).await
    }

    /// Explicit cache invalidation: refetches and replaces the snapshot.
    pub async fn refresh(&self, pool: &DbPool) -> Result<Arc<SchemaContext>, SchemaError> {
        let context = Arc::new(fetch_schema(pool).await?);
        info!(
            event_name = "schema.cache.refreshed",
            table_count = context.table_count(),
            "schema cache populated"
        );
        *self.inner.write().await = Some(Arc::clone(&context));
        Ok(context)
    }

    pub async fn get(&self) -> Option<Arc<SchemaContext>> {
        self.inner.read().await.clone()
    }
}
