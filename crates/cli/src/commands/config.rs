use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use autoquery_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "AUTOQUERY_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "AUTOQUERY_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.query_timeout_secs",
        &config.database.query_timeout_secs.to_string(),
        source("database.query_timeout_secs", "AUTOQUERY_DATABASE_QUERY_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "llm.provider",
        &format!("{:?}", config.llm.provider),
        source("llm.provider", "AUTOQUERY_LLM_PROVIDER"),
    ));
    lines.push(render_line("llm.model", &config.llm.model, source("llm.model", "AUTOQUERY_LLM_MODEL")));
    lines.push(render_line(
        "llm.base_url",
        config.llm.base_url.as_deref().unwrap_or("<unset>"),
        source("llm.base_url", "AUTOQUERY_LLM_BASE_URL"),
    ));
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line("llm.api_key", llm_api_key, source("llm.api_key", "AUTOQUERY_LLM_API_KEY")));

    lines.push(render_line(
        "agent.max_iterations",
        &config.agent.max_iterations.to_string(),
        source("agent.max_iterations", "AUTOQUERY_AGENT_MAX_ITERATIONS"),
    ));
    lines.push(render_line(
        "agent.max_run_secs",
        &config.agent.max_run_secs.to_string(),
        source("agent.max_run_secs", "AUTOQUERY_AGENT_MAX_RUN_SECS"),
    ));
    lines.push(render_line(
        "agent.row_limit",
        &config.agent.row_limit.to_string(),
        source("agent.row_limit", "AUTOQUERY_AGENT_ROW_LIMIT"),
    ));
    lines.push(render_line(
        "agent.max_history_turns",
        &config.agent.max_history_turns.to_string(),
        source("agent.max_history_turns", "AUTOQUERY_AGENT_MAX_HISTORY_TURNS"),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", "AUTOQUERY_SERVER_BIND_ADDRESS"),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", "AUTOQUERY_SERVER_PORT"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "AUTOQUERY_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "AUTOQUERY_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("autoquery.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/autoquery.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
