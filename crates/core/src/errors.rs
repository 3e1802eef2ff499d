use thiserror::Error;

/// Failure to introspect the warehouse schema. Fatal at startup: the
/// process cannot serve questions until the dataset is reachable.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("warehouse is unreachable: {0}")]
    Unavailable(String),
    #[error("dataset contains no queryable tables")]
    EmptyDataset,
}

/// Outcome of a rejected or failed SQL execution. Never crosses the
/// gateway boundary as a panic or an unclassified sqlx error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Statement refused before execution (non-read SQL, multiple
    /// statements, empty input).
    #[error("statement rejected: {0}")]
    Rejected(String),
    /// The engine reported an error while executing the statement.
    #[error("query failed: {0}")]
    Execution(String),
    /// Execution exceeded the per-statement timeout.
    #[error("query timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
    /// The warehouse connection itself failed. Not model-correctable.
    #[error("warehouse unavailable: {0}")]
    Unavailable(String),
}

impl QueryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable(_))
    }

    /// Whether the error text should be fed back to the completion
    /// service so it can correct the next attempt. Infrastructure
    /// failures carry no signal the model can act on.
    pub fn is_model_correctable(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Execution(_) | Self::Timeout { .. })
    }
}

/// Failure to obtain a proposal from the completion service.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion service unavailable: {0}")]
    Unavailable(String),
    #[error("completion request rejected with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion response could not be decoded: {0}")]
    Decode(String),
}

impl CompletionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Decode(_) => true,
            // 5xx is transient; 4xx means the request itself is bad and
            // retrying the identical payload cannot succeed.
            Self::Status { status, .. } => *status >= 500,
        }
    }
}

/// Terminal failure of a whole agent run. `Exhausted` is deliberately
/// absent: running out of budget is a defined outcome, not an error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("completion service unavailable after {attempts} attempts")]
    CompletionExhausted { attempts: u32 },
    #[error("completion service produced {attempts} unparseable responses")]
    MalformedExhausted { attempts: u32 },
    #[error("warehouse unreachable for every attempt in this run")]
    WarehouseUnreachable,
}

impl RunError {
    /// Plain-language text shown to the end user. Raw service payloads
    /// never surface here.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::CompletionExhausted { .. } => {
                "The analysis service is temporarily unavailable. Please retry shortly."
            }
            Self::MalformedExhausted { .. } => {
                "I could not produce a usable analysis for this question. Please rephrase and try again."
            }
            Self::WarehouseUnreachable => {
                "The sales database is currently unreachable. Please retry shortly."
            }
        }
    }
}
