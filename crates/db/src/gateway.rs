//! SQL execution gateway.
//!
//! Runs one read-only statement at a time against the warehouse with a
//! row cap and a per-statement timeout. Every failure mode is returned
//! as a `QueryError` value so the agent loop never has to catch a panic
//! or see a raw sqlx error.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::debug;

use autoquery_core::{QueryError, QueryResult, SqlExecutor};

use crate::connection::DbPool;

/// Keywords that make a statement non-read regardless of position.
/// Matched against whole uppercase tokens, so identifiers such as
/// `created_at` do not trip the guard.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "REPLACE", "TRUNCATE", "ATTACH",
    "DETACH", "PRAGMA", "VACUUM", "REINDEX", "GRANT", "REVOKE",
];

#[derive(Clone)]
pub struct SqliteGateway {
    pool: DbPool,
    query_timeout: Duration,
}

impl SqliteGateway {
    pub fn new(pool: DbPool, query_timeout_secs: u64) -> Self {
        Self { pool, query_timeout: Duration::from_secs(query_timeout_secs.max(1)) }
    }
}

#[async_trait]
impl SqlExecutor for SqliteGateway {
    async fn execute(&self, statement: &str, row_limit: u32) -> Result<QueryResult, QueryError> {
        let sanitized = sanitize_read_only(statement)?;
        let capped = apply_row_limit(&sanitized, row_limit);

        debug!(event_name = "gateway.execute", statement = %capped, row_limit, "executing statement");

        let started = Instant::now();
        let fetched =
            tokio::time::timeout(self.query_timeout, sqlx::query(&capped).fetch_all(&self.pool))
                .await;

        let rows = match fetched {
            Err(_elapsed) => {
                return Err(QueryError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(error)) => return Err(classify_sqlx_error(error)),
            Ok(Ok(rows)) => rows,
        };

        Ok(into_query_result(rows, row_limit))
    }
}

/// Validates that the statement is a single SELECT-class query and
/// returns it trimmed of whitespace and trailing semicolon.
fn sanitize_read_only(statement: &str) -> Result<String, QueryError> {
    let trimmed = statement.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(QueryError::Rejected("statement is empty".to_string()));
    }

    if trimmed.contains(';') {
        return Err(QueryError::Rejected(
            "multiple statements are not allowed; submit one query at a time".to_string(),
        ));
    }

    let tokens = keyword_tokens(trimmed);
    let first = tokens.first().map(String::as_str).unwrap_or_default();
    if first != "SELECT" && first != "WITH" {
        return Err(QueryError::Rejected(format!(
            "only read-only SELECT queries are allowed, got a statement starting with `{first}`"
        )));
    }

    if let Some(keyword) = tokens.iter().find(|token| FORBIDDEN_KEYWORDS.contains(&token.as_str()))
    {
        return Err(QueryError::Rejected(format!(
            "statement contains forbidden keyword `{keyword}`; only read-only queries are allowed"
        )));
    }

    Ok(trimmed.to_string())
}

/// Caps the result at the query level: statements without an outer
/// LIMIT are wrapped in `SELECT * FROM ( ... ) LIMIT n` so excess rows
/// are never pulled over the wire. Statements that already limit
/// themselves run unchanged; fetched rows are truncated as a backstop.
fn apply_row_limit(statement: &str, row_limit: u32) -> String {
    if has_outer_limit(statement) {
        statement.to_string()
    } else {
        format!("SELECT * FROM ({statement}) LIMIT {row_limit}")
    }
}

fn has_outer_limit(statement: &str) -> bool {
    let mut depth = 0i32;
    for token in raw_tokens(statement) {
        match token.as_str() {
            "(" => depth += 1,
            ")" => depth -= 1,
            "LIMIT" if depth == 0 => return true,
            _ => {}
        }
    }
    false
}

/// Uppercased word tokens, parentheses preserved as their own tokens.
fn raw_tokens(statement: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in statement.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            current.push(ch.to_ascii_uppercase());
        } else {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            if ch == '(' || ch == ')' {
                tokens.push(ch.to_string());
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn keyword_tokens(statement: &str) -> Vec<String> {
    raw_tokens(statement).into_iter().filter(|token| token != "(" && token != ")").collect()
}

fn classify_sqlx_error(error: sqlx::Error) -> QueryError {
    match &error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            QueryError::Unavailable(error.to_string())
        }
        sqlx::Error::Database(database_error) => {
            QueryError::Execution(database_error.message().to_string())
        }
        _ => QueryError::Execution(error.to_string()),
    }
}

fn into_query_result(rows: Vec<SqliteRow>, row_limit: u32) -> QueryResult {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|column| column.name().to_string()).collect())
        .unwrap_or_default();

    let decoded = rows
        .iter()
        .take(row_limit as usize)
        .map(|row| {
            let values =
                (0..row.columns().len()).map(|index| decode_value(row, index)).collect::<Vec<_>>();
            Value::Array(values)
        })
        .collect::<Vec<_>>();

    let row_count = decoded.len() as u32;
    QueryResult { columns, rows: decoded, row_count }
}

/// SQLite values are dynamically typed, so the stored type drives the
/// decode. Decoding through a guessed Rust type instead would silently
/// coerce (TEXT decoded as i64 yields 0).
fn decode_value(row: &SqliteRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }

    match raw.type_info().name() {
        "INTEGER" => row.try_get::<i64, _>(index).map(Value::from).unwrap_or(Value::Null),
        "REAL" => row.try_get::<f64, _>(index).map(Value::from).unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|bytes| Value::from(format!("<{} bytes>", bytes.len())))
            .unwrap_or(Value::Null),
        _ => row.try_get::<String, _>(index).map(Value::from).unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use autoquery_core::{QueryError, SqlExecutor};

    use crate::connection::connect_with_settings;
    use crate::fixtures::AutomotiveSeedDataset;
    use crate::gateway::{apply_row_limit, has_outer_limit, sanitize_read_only, SqliteGateway};

    async fn seeded_gateway() -> SqliteGateway {
        let pool = connect_with_settings("sqlite::memory:", 1, 5)
            .await
            .expect("in-memory pool should connect");
        AutomotiveSeedDataset::load(&pool).await.expect("seed should load");
        SqliteGateway::new(pool, 5)
    }

    #[test]
    fn rejects_dml_and_ddl_statements() {
        for statement in [
            "DELETE FROM vehicles",
            "INSERT INTO vehicles VALUES (1)",
            "DROP TABLE customers",
            "UPDATE vehicles SET msrp = 0",
            "PRAGMA journal_mode = DELETE",
            "",
        ] {
            assert!(
                matches!(sanitize_read_only(statement), Err(QueryError::Rejected(_))),
                "should reject: {statement}"
            );
        }
    }

    #[test]
    fn rejects_multi_statement_input() {
        let result = sanitize_read_only("SELECT 1; DROP TABLE vehicles");
        assert!(matches!(result, Err(QueryError::Rejected(_))));
    }

    #[test]
    fn accepts_select_and_cte_statements() {
        assert!(sanitize_read_only("SELECT * FROM vehicles;").is_ok());
        assert!(sanitize_read_only("WITH t AS (SELECT 1 AS x) SELECT x FROM t").is_ok());
    }

    #[test]
    fn identifiers_containing_keywords_do_not_trip_the_guard() {
        let statement = "SELECT created_at, updated_at FROM sales_transactions";
        assert!(sanitize_read_only(statement).is_ok());
    }

    #[test]
    fn statements_without_limit_are_wrapped_at_the_query_level() {
        let capped = apply_row_limit("SELECT make FROM vehicles", 10);
        assert_eq!(capped, "SELECT * FROM (SELECT make FROM vehicles) LIMIT 10");
    }

    #[test]
    fn existing_outer_limit_is_respected() {
        let statement = "SELECT make FROM vehicles LIMIT 3";
        assert!(has_outer_limit(statement));
        assert_eq!(apply_row_limit(statement, 10), statement);
    }

    #[test]
    fn limit_inside_a_subquery_does_not_count_as_outer() {
        let statement = "SELECT * FROM (SELECT make FROM vehicles LIMIT 50)";
        assert!(!has_outer_limit(statement));
    }

    #[tokio::test]
    async fn executes_count_query_against_seeded_warehouse() {
        let gateway = seeded_gateway().await;
        let result = gateway
            .execute("SELECT COUNT(*) AS vehicle_count FROM vehicles", 10)
            .await
            .expect("count query should succeed");

        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns, vec!["vehicle_count".to_string()]);
        assert_eq!(result.rows[0][0], serde_json::json!(8));
    }

    #[tokio::test]
    async fn row_cap_is_enforced_end_to_end() {
        let gateway = seeded_gateway().await;
        let result = gateway
            .execute("SELECT transaction_id FROM sales_transactions ORDER BY transaction_id", 4)
            .await
            .expect("query should succeed");

        assert_eq!(result.row_count, 4);
        assert_eq!(result.rows.len(), 4);
    }

    #[tokio::test]
    async fn outer_limit_above_the_cap_is_truncated_on_fetch() {
        let gateway = seeded_gateway().await;
        let result = gateway
            .execute("SELECT transaction_id FROM sales_transactions LIMIT 50", 4)
            .await
            .expect("query should succeed");

        assert_eq!(result.row_count, 4);
        assert_eq!(result.rows.len(), 4);
    }

    #[tokio::test]
    async fn zero_row_success_is_not_an_error() {
        let gateway = seeded_gateway().await;
        let result = gateway
            .execute("SELECT * FROM vehicles WHERE make = 'DeLorean'", 10)
            .await
            .expect("empty result should still be a success");

        assert_eq!(result.row_count, 0);
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn unknown_table_returns_execution_error_not_panic() {
        let gateway = seeded_gateway().await;
        let error = gateway
            .execute("SELECT * FROM nonexistent", 10)
            .await
            .expect_err("unknown table should fail");

        match error {
            QueryError::Execution(message) => assert!(message.contains("nonexistent")),
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_attempt_is_rejected_before_reaching_the_engine() {
        let gateway = seeded_gateway().await;
        let error = gateway
            .execute("DELETE FROM vehicles", 10)
            .await
            .expect_err("write must be rejected");
        assert!(matches!(error, QueryError::Rejected(_)));

        let count = gateway
            .execute("SELECT COUNT(*) FROM vehicles", 10)
            .await
            .expect("warehouse should be intact");
        assert_eq!(count.rows[0][0], serde_json::json!(8));
    }
}
