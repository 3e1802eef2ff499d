pub mod boundary;
pub mod config;
pub mod errors;
pub mod schema;
pub mod transcript;

pub use boundary::{Action, CompletionClient, PromptContext, QueryResult, SqlExecutor};
pub use errors::{CompletionError, QueryError, RunError, SchemaError};
pub use schema::{ColumnInfo, SchemaContext};
pub use transcript::{AgentAnswer, ConversationTurn, RunStatus, SqlStep, TranscriptEntry};
