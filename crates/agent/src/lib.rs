//! Agent orchestration for natural-language SQL analytics.
//!
//! This crate turns a user question into one or more SQL executions and
//! a grounded final answer:
//! - `actions` classifies free-text completion output into typed actions
//! - `prompt` renders schema, history, and the running transcript into
//!   chat messages
//! - `llm` is the HTTP completion client (OpenAI-compatible and Ollama)
//! - `conversation` holds the bounded per-session history
//! - `runtime` is the state machine that ties it all together under
//!   iteration, time, and retry budgets

pub mod actions;
pub mod conversation;
pub mod llm;
pub mod prompt;
pub mod runtime;

pub use actions::parse_action;
pub use conversation::ConversationStore;
pub use llm::HttpCompletionClient;
pub use runtime::AgentLoop;
