//! Error Types

use std::time::Duration;

use thiserror::Error;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that end a turn or reject a registry/config operation.
///
/// Tool failures never show up here: they are folded into error-flagged
/// [`ToolResult`](crate::tool::ToolResult)s and fed back to the model.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Network or HTTP failure talking to the model backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// Backend signalled throttling
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-suggested wait, if the backend sent one
        retry_after: Option<Duration>,
    },

    /// Wire payload could not be mapped onto the canonical shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A tool with this name is already registered
    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    /// The model kept requesting tools past the configured turn limit
    #[error("Tool loop exceeded {0} model turns")]
    ToolLoopExceeded(usize),

    /// An append would break the call/result correlation of the log
    #[error("Invalid conversation: {0}")]
    InvalidConversation(String),

    /// Caller cancelled the turn
    #[error("Turn cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl ChatError {
    /// Rate-limit error without a retry hint
    pub fn rate_limited(message: impl Into<String>) -> Self {
        ChatError::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Check if error is retryable at the transport level
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::Transport(_) | ChatError::RateLimited { .. } | ChatError::Io(_)
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Transport(_) | ChatError::Io(_) => {
                "The AI service could not be reached. Please try again.".into()
            }
            ChatError::RateLimited { .. } => {
                "The AI service is throttling requests. Please wait a moment.".into()
            }
            ChatError::MalformedResponse(msg) => {
                format!("The AI service returned a response that could not be understood: {}", msg)
            }
            ChatError::DuplicateTool(name) => format!("The tool '{}' is registered twice.", name),
            ChatError::ToolLoopExceeded(_) => {
                "The request needed too many tool calls. Please try a simpler query.".into()
            }
            ChatError::Cancelled => "Cancelled.".into(),
            ChatError::Config(msg) => format!("Configuration problem: {}", msg),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Other(err.to_string())
    }
}

/// Failure raised by a tool handler or the tool-execution collaborator.
///
/// The dispatcher turns every variant into an error-flagged result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool not found")]
    NotFound,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Execution(String),

    #[error("tool transport failed: {0}")]
    Transport(String),
}
