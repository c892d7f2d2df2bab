use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Unusable configuration. Raised before any network activity and never retried.
    #[error("Config error: {0}")]
    Configuration(String),

    /// Connection-level failure talking to a backend.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A backend answered with a non-success HTTP status.
    #[error("{service} returned {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    /// A response that does not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Tool error: {0}")]
    ToolExecution(String),

    /// A second message arrived while one was still being processed.
    #[error("Conversation busy: {0}")]
    Busy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn protocol(err: impl std::fmt::Display) -> Self {
        Self::Protocol(err.to_string())
    }

    /// Whether this failure came from the wire rather than from local state.
    /// Remote session handles are not reused after such a failure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Status { .. } | Self::Protocol(_) | Self::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
