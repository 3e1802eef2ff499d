use crate::commands::CommandResult;
use autoquery_core::config::{AppConfig, LoadOptions};
use autoquery_core::SchemaError;
use autoquery_db::{connect_with_settings, fetch_schema};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "schema",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "schema",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let schema = fetch_schema(&pool).await;
        pool.close().await;

        schema.map_err(|error| match error {
            SchemaError::EmptyDataset => (
                "empty_dataset",
                "the database holds no tables; run `autoquery seed` first".to_string(),
                5u8,
            ),
            SchemaError::Unavailable(detail) => ("schema_unavailable", detail, 4u8),
        })
    });

    match result {
        Ok(schema) => CommandResult::success(
            "schema",
            format!("{} tables:\n{}", schema.table_count(), schema.summary()),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("schema", error_class, message, exit_code)
        }
    }
}
