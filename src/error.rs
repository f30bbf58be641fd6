// src/error.rs
// Error taxonomy for the orchestration core

use thiserror::Error;

/// Errors raised while driving an MCP child process session.
#[derive(Error, Debug)]
pub enum McpError {
    #[error("transport error talking to server '{server}': {source}")]
    Transport {
        server: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("server '{server}' did not respond to '{method}' within {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },
    #[error("protocol error from server '{server}': {message}")]
    Protocol { server: String, message: String },
    #[error("unknown tool '{wire_name}'")]
    UnknownTool { wire_name: String },
    #[error("server '{server}' is not ready (state: {state})")]
    ServerNotReady { server: String, state: String },
    #[error("server '{server}' rejected request: {message}")]
    ServerError { server: String, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while extracting or validating the final structured response.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("no call to 'response_formatter' was found in the provider reply")]
    MissingFormatterCall,
    #[error("'response_formatter' arguments were not valid JSON: {0}")]
    InvalidArguments(String),
    #[error("invalid response shape: {0}")]
    InvalidShape(String),
    #[error("formatter validation failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Top-level error taxonomy surfaced by the Sequential Thinking Loop and the
/// HTTP layer. Tool-call-local failures never become one of these; they are
/// folded back into the conversation as synthetic tool results instead.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("request was cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// The `kind` string surfaced in the terminating `{"type":"error",...}` line.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Transport(_) => "transport",
            OrchestratorError::Timeout(_) => "timeout",
            OrchestratorError::Protocol(_) => "protocol",
            OrchestratorError::Format(_) => "format",
            OrchestratorError::Cancelled => "cancelled",
            OrchestratorError::Internal(_) => "internal",
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<McpError> for OrchestratorError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Transport { .. } | McpError::Io(_) => {
                OrchestratorError::Transport(err.to_string())
            }
            McpError::Timeout { .. } => OrchestratorError::Timeout(err.to_string()),
            McpError::Protocol { .. } => OrchestratorError::Protocol(err.to_string()),
            McpError::UnknownTool { .. }
            | McpError::ServerNotReady { .. }
            | McpError::ServerError { .. } => OrchestratorError::Internal(err.to_string()),
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;
pub type FormatResult<T> = Result<T, FormatError>;
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
