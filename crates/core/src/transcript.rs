use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded SQL execution attempt and its outcome within a run.
/// Immutable once recorded. A step either returned rows or carries an
/// error message, never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlStep {
    pub statement: String,
    pub rows_returned: Option<u32>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl SqlStep {
    pub fn succeeded(statement: impl Into<String>, rows_returned: u32, duration_ms: u64) -> Self {
        Self {
            statement: statement.into(),
            rows_returned: Some(rows_returned),
            error_message: None,
            duration_ms,
        }
    }

    pub fn failed(
        statement: impl Into<String>,
        error_message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            statement: statement.into(),
            rows_returned: None,
            error_message: Some(error_message.into()),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_message.is_none()
    }
}

/// A step paired with the observation text fed back to the completion
/// service on the next iteration: the rendered result rows for a
/// success, or the verbatim error text for a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub step: SqlStep,
    pub observation: String,
}

/// Terminal or in-flight status of an agent run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Answered,
    Failed,
    Exhausted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Answered => "answered",
            Self::Failed => "failed",
            Self::Exhausted => "exhausted",
        }
    }
}

/// The result handed back to the session boundary after a run
/// terminates: the answer text, the terminal status, and the ordered
/// SQL trail that grounds the answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAnswer {
    pub text: String,
    pub status: RunStatus,
    pub sql_trail: Vec<SqlStep>,
}

/// One completed question/answer exchange. Owned by the conversation
/// store, appended after a run terminates, never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub sql_trail: Vec<SqlStep>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(question: impl Into<String>, answer: &AgentAnswer) -> Self {
        Self {
            question: question.into(),
            answer: answer.text.clone(),
            sql_trail: answer.sql_trail.clone(),
            timestamp: Utc::now(),
        }
    }
}
