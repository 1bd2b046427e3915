//! Error types for the ACP bridge

use std::sync::Arc;

use thiserror::Error;

/// Main error type for the ACP bridge
#[derive(Error, Debug)]
pub enum AgentError {
    /// Agent executable not found on the search path or in the bundled runtime
    #[error("Agent executable not found: {0}")]
    ExecutableNotFound(String),

    /// Connection error when communicating with an agent
    #[error("Connection error: {0}")]
    Connection(String),

    /// The agent connection closed while a request was outstanding
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Process execution error with exit code and stderr
    #[error("Process error (exit code {exit_code}): {message}")]
    Process {
        /// Error message
        message: String,
        /// Process exit code
        exit_code: i32,
        /// Standard error output
        stderr: Option<String>,
    },

    /// JSON decode error when parsing agent output
    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// Message parse error with optional raw data
    #[error("Message parse error: {message}")]
    MessageParse {
        /// Error message
        message: String,
        /// Raw message data that failed to parse
        data: Option<serde_json::Value>,
    },

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol handshake failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Protocol error (unexpected message shape or unsupported version)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error returned by the agent
    #[error("Agent returned error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
        /// Optional error data
        data: Option<serde_json::Value>,
    },

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No session registered for a conversation
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// No pending permission request with the given id
    #[error("Permission request not found: {0}")]
    PermissionNotFound(String),

    /// Session metadata persistence failure
    #[error("Session store error: {0}")]
    Store(String),

    /// Turn ended with an error event
    #[error("Turn failed: {0}")]
    Turn(String),

    /// Failure shared between callers awaiting the same in-flight operation
    #[error(transparent)]
    Shared(Arc<AgentError>),
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Create an executable not found error
    pub fn executable_not_found(command: impl AsRef<str>) -> Self {
        Self::ExecutableNotFound(format!(
            "'{}' is not on PATH and no bundled runtime provides it",
            command.as_ref()
        ))
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a connection closed error
    pub fn connection_closed(msg: impl Into<String>) -> Self {
        Self::ConnectionClosed(msg.into())
    }

    /// Create a process error
    pub fn process(msg: impl Into<String>, exit_code: i32, stderr: Option<String>) -> Self {
        Self::Process {
            message: msg.into(),
            exit_code,
            stderr,
        }
    }

    /// Create a message parse error
    pub fn message_parse(msg: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::MessageParse {
            message: msg.into(),
            data,
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a handshake error
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a JSON-RPC error
    pub fn rpc(code: i64, message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create a JSON encode error
    pub fn json_encode(msg: impl Into<String>) -> Self {
        Self::JsonDecode(serde_json::Error::io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            msg.into(),
        )))
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a session not found error
    pub fn session_not_found(conversation_id: impl Into<String>) -> Self {
        Self::SessionNotFound(conversation_id.into())
    }

    /// Create a permission not found error
    pub fn permission_not_found(request_id: impl Into<String>) -> Self {
        Self::PermissionNotFound(request_id.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a turn error
    pub fn turn(msg: impl Into<String>) -> Self {
        Self::Turn(msg.into())
    }

    /// Recover an owned error from one shared by single-flight waiters
    #[must_use]
    pub fn from_shared(err: Arc<AgentError>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(Self::Shared)
    }

    /// Whether this error means the agent connection is gone
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::ConnectionClosed(_) | Self::Connection(_) | Self::Transport(_) => true,
            Self::Shared(inner) => inner.is_connection_lost(),
            _ => false,
        }
    }
}
