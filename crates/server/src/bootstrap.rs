use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use autoquery_core::config::{AppConfig, ConfigError, LoadOptions};
use autoquery_core::SchemaError;
use autoquery_db::{connect_with_settings, AutomotiveSeedDataset, DbPool, SchemaCache};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub schema_cache: Arc<SchemaCache>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("seed dataset load failed: {0}")]
    Seed(#[source] sqlx::Error),
    #[error("schema introspection failed: {0}")]
    Schema(#[from] SchemaError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    let schema_cache = Arc::new(SchemaCache::new());
    match schema_cache.get_or_load(&db_pool).await {
        Ok(context) => {
            info!(
                event_name = "system.bootstrap.schema_loaded",
                table_count = context.table_count(),
                "schema loaded"
            );
        }
        // A fresh database gets the automotive seed dataset so the
        // server is immediately queryable.
        Err(SchemaError::EmptyDataset) => {
            AutomotiveSeedDataset::load(&db_pool).await.map_err(BootstrapError::Seed)?;
            let context = schema_cache.refresh(&db_pool).await?;
            info!(
                event_name = "system.bootstrap.dataset_seeded",
                table_count = context.table_count(),
                "empty database seeded with the automotive dataset"
            );
        }
        Err(error) => return Err(BootstrapError::Schema(error)),
    }

    Ok(Application { config, db_pool, schema_cache })
}

#[cfg(test)]
mod tests {
    use autoquery_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn in_memory_options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_seeds_an_empty_database_and_loads_the_schema() {
        let app = bootstrap(in_memory_options("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed against an in-memory database");

        let schema = app.schema_cache.get().await.expect("schema cached during bootstrap");
        assert_eq!(schema.table_count(), 6);
        assert!(schema.tables.contains_key("sales_transactions"));

        let (vehicle_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vehicles")
            .fetch_one(&app.db_pool)
            .await
            .expect("seeded table should be queryable");
        assert!(vehicle_count > 0, "seed dataset should populate vehicles");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent_against_an_already_seeded_database() {
        let url = "sqlite://file:bootstrap_reuse?mode=memory&cache=shared";
        let first = bootstrap(in_memory_options(url)).await.expect("first bootstrap");
        let second = bootstrap(in_memory_options(url)).await.expect("second bootstrap");

        let schema = second.schema_cache.get().await.expect("schema cached");
        assert_eq!(schema.table_count(), 6);

        second.db_pool.close().await;
        first.db_pool.close().await;
    }
}
