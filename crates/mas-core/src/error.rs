use thiserror::Error;

/// A convenience `Result` alias using [`MasError`].
pub type MasResult<T> = Result<T, MasError>;

/// Top-level error type for the MAS crates.
#[derive(Error, Debug)]
pub enum MasError {
    /// A task was submitted before the orchestrator was started.
    #[error("orchestrator not running")]
    NotRunning,

    /// One or more referenced agents are not registered.
    #[error("unknown agent(s): {}", .0.join(", "))]
    UnknownAgent(Vec<String>),

    /// One or more required roles are absent from the registry.
    #[error("missing required role(s): {}", .0.join(", "))]
    MissingRole(Vec<String>),

    /// An agent with the same name is already registered.
    #[error("agent '{0}' is already registered")]
    DuplicateName(String),

    /// Lookup or cancellation against an unknown task identifier.
    #[error("task not found")]
    TaskNotFound,

    /// The submitted task is malformed.
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// An agent's `process` call failed.
    #[error("{0}")]
    AgentExecution(String),

    /// The operation observed a cancellation request and stopped early.
    #[error("operation cancelled")]
    Cancelled,

    /// A bounded wait elapsed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Invalid or unreadable configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MasError {
    /// Shorthand for an [`MasError::AgentExecution`] error.
    pub fn agent(message: impl Into<String>) -> Self {
        Self::AgentExecution(message.into())
    }

    /// Whether this error is the cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
