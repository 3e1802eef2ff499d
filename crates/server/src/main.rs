mod api;
mod bootstrap;
mod health;

use std::sync::Arc;

use anyhow::Result;

use autoquery_agent::{AgentLoop, HttpCompletionClient};
use autoquery_core::config::{AppConfig, LoadOptions};
use autoquery_db::SqliteGateway;

fn init_logging(config: &AppConfig) {
    use autoquery_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let completion = HttpCompletionClient::from_config(&app.config.llm)
        .map_err(|error| anyhow::anyhow!("completion client setup failed: {error}"))?;
    let gateway =
        SqliteGateway::new(app.db_pool.clone(), app.config.database.query_timeout_secs);
    let agent = AgentLoop::new(completion, gateway, app.config.agent, app.config.llm.max_retries);

    let service = api::AgentService::new(agent, app.schema_cache, app.db_pool.clone());
    let state = api::AppState::new(Arc::new(service), app.config.agent.max_history_turns);

    let router = api::router(state).merge(health::router(app.db_pool.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        "autoquery-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(event_name = "system.server.stopping", "autoquery-server stopping");
    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
