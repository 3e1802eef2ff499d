//! Trait seams between the agent loop and its external collaborators.
//!
//! The loop only ever talks to the warehouse and the completion service
//! through these traits, so tests can swap in deterministic stubs and
//! neither sqlx nor reqwest types cross into the orchestration code.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{CompletionError, QueryError};
use crate::schema::SchemaContext;
use crate::transcript::{ConversationTurn, TranscriptEntry};

/// The classified output of the completion service: a SQL request, a
/// final answer, or a response that parsed as neither.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    RunSql { statement: String },
    FinalAnswer { text: String },
    Malformed { raw: String },
}

/// Successful result of one gateway execution, already capped to the
/// configured row limit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Value>,
    pub row_count: u32,
}

impl QueryResult {
    /// Render rows for the transcript observation. Kept deliberately
    /// plain: header line, then one JSON array per row.
    pub fn render(&self) -> String {
        if self.rows.is_empty() {
            return "query succeeded: 0 rows".to_string();
        }
        let mut out = format!("columns: {}\n", self.columns.join(", "));
        for row in &self.rows {
            out.push_str(&row.to_string());
            out.push('\n');
        }
        out.push_str(&format!("({} rows)", self.row_count));
        out
    }
}

/// Everything the completion service needs to propose the next action.
///
/// `corrections` carries synthetic parse-failure feedback for malformed
/// responses; it is prompt context only and never becomes a `SqlStep`.
#[derive(Clone, Debug)]
pub struct PromptContext<'a> {
    pub question: &'a str,
    pub schema: &'a SchemaContext,
    pub history: &'a [ConversationTurn],
    pub transcript: &'a [TranscriptEntry],
    pub corrections: &'a [String],
}

/// Executes one read-only SQL statement against the warehouse with a
/// row cap. Stateless per call; safe to share across concurrent runs.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, statement: &str, row_limit: u32) -> Result<QueryResult, QueryError>;
}

/// Proposes the next action for a run. Serialization of the context and
/// classification of the reply live behind this trait; retry policy does
/// not — that belongs to the agent loop.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn propose(&self, context: &PromptContext<'_>) -> Result<Action, CompletionError>;
}
