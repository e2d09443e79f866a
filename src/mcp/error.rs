//! Errors surfaced by the MCP process layer

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum McpError {
    /// The executable could not be launched
    #[error("Failed to spawn MCP server '{command}': {message}")]
    Spawn { command: String, message: String },

    /// Writing to the server's stdin failed (usually because it exited)
    #[error("Failed to write to MCP server: {0}")]
    Write(String),

    /// The server answered with an error object
    #[error("{message}")]
    ToolInvocation { code: i64, message: String },

    /// No matching response within the deadline
    #[error("Request timeout")]
    RequestTimeout { method: String, id: u64 },

    /// The server process went away while the request was pending
    #[error("MCP server exited before responding to request {id}")]
    ProcessExited { id: u64 },

    /// No live server to talk to
    #[error("MCP Server not available")]
    NotRunning,

    /// A response arrived but its payload had the wrong shape
    #[error("Invalid MCP response: {0}")]
    Protocol(String),

    #[error("MCP initialization failed: {0}")]
    Initialization(String),
}

impl McpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::RequestTimeout { .. })
    }

    /// Wrap any failure as an initialization failure, keeping the message.
    pub fn into_initialization(self) -> Self {
        match self {
            McpError::Initialization(_) => self,
            other => McpError::Initialization(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Protocol(err.to_string())
    }
}

pub type McpResult<T> = std::result::Result<T, McpError>;
