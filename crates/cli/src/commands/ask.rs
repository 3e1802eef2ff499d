use crate::commands::CommandResult;
use autoquery_agent::{AgentLoop, HttpCompletionClient};
use autoquery_core::config::{AppConfig, LoadOptions};
use autoquery_core::SqlStep;
use autoquery_db::{connect_with_settings, fetch_schema, SqliteGateway};

const SAMPLE_QUESTIONS: &[&str] = &[
    "How many vehicles were sold in 2024?",
    "What was the total sales revenue by state?",
    "Which dealership sold the most SUVs?",
    "What is the average discount from MSRP by vehicle make?",
    "How did our monthly sales compare to competitor sales in the West region?",
    "Which marketing campaign period saw the highest transaction volume?",
];

pub fn examples() -> CommandResult {
    let listing: Vec<String> =
        SAMPLE_QUESTIONS.iter().map(|question| format!("  - {question}")).collect();
    CommandResult::success("ask", format!("sample questions:\n{}", listing.join("\n")))
}

/// One-shot question with no session history. The full stack is wired
/// the same way the server wires it; only the conversation store is
/// absent.
pub fn run(question: &str) -> CommandResult {
    if question.trim().is_empty() {
        return CommandResult::failure("ask", "empty_question", "question must not be empty", 2);
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "ask",
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
                "ask",
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

        let schema = fetch_schema(&pool)
            .await
            .map_err(|error| ("schema_unavailable", error.to_string(), 5u8))?;

        let completion = HttpCompletionClient::from_config(&config.llm)
            .map_err(|error| ("completion_setup", error.to_string(), 6u8))?;
        let gateway = SqliteGateway::new(pool.clone(), config.database.query_timeout_secs);
        let agent = AgentLoop::new(completion, gateway, config.agent, config.llm.max_retries);

        let answer = agent.ask(question.trim(), &schema, &[]).await;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(answer)
    });

    match result {
        Ok(answer) => {
            let mut message = format!("[{}] {}", answer.status.as_str(), answer.text);
            if !answer.sql_trail.is_empty() {
                message.push_str("\nsql trail:");
                for step in &answer.sql_trail {
                    message.push('\n');
                    message.push_str(&render_step(step));
                }
            }
            CommandResult::success("ask", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("ask", error_class, message, exit_code)
        }
    }
}

fn render_step(step: &SqlStep) -> String {
    match (&step.error_message, step.rows_returned) {
        (Some(error), _) => format!("  - {} -> error: {error}", step.statement),
        (None, Some(rows)) => format!("  - {} -> {rows} rows", step.statement),
        (None, None) => format!("  - {}", step.statement),
    }
}
