//! Error types for the ACP bridge

use thiserror::Error;

use crate::rpc::RpcError;

/// JSON-RPC error codes used on the wire
///
/// Standard JSON-RPC 2.0 codes plus the bridge-specific range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Standard JSON-RPC errors (-32xxx)
    /// Parse error: Invalid JSON
    ParseError = -32700,
    /// Invalid request: Not a valid request object
    InvalidRequest = -32600,
    /// Method not found
    MethodNotFound = -32601,
    /// Invalid params
    InvalidParams = -32602,
    /// Internal error
    InternalError = -32603,

    // Bridge-specific errors (-32000 to -32099)
    /// Unknown terminal handle
    UnknownTerminal = -32001,
    /// Agent process is not running
    ProcessExited = -32002,
}

impl ErrorCode {
    /// Get the error code value
    pub fn code(self) -> i64 {
        self as i64
    }
}

/// Main error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    // === Startup errors ===
    /// The agent executable could not be located
    #[error("Agent executable not found: {0}")]
    AgentNotFound(String),

    /// The agent process could not be spawned for another reason
    #[error("Failed to spawn agent: {0}")]
    Spawn(String),

    // === Transport errors ===
    /// Write to a dead or closed agent pipe
    #[error("Agent pipe error: {0}")]
    Pipe(String),

    /// A line could not be decoded as a JSON-RPC message
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The agent process exited while calls were still pending
    #[error("Agent process exited")]
    ProcessExited,

    // === Call errors ===
    /// A caller-local wait expired; the underlying call may still complete
    #[error("Call timed out after {0}ms")]
    Timeout(u64),

    /// The agent returned a JSON-RPC error for our request
    #[error("Agent returned error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),

    // === Session errors ===
    /// Prompt issued before a session was negotiated
    #[error("No active session")]
    NoActiveSession,

    // === Server-request errors (returned to the agent, never thrown locally) ===
    /// Unknown terminal handle
    #[error("Unknown terminal: {0}")]
    UnknownTerminal(String),

    /// Method the bridge does not implement
    #[error("Method not supported: {0}")]
    MethodNotSupported(String),

    // === External errors ===
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic errors ===
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for the bridge
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Get the JSON-RPC error code for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            BridgeError::MalformedMessage(_) | BridgeError::Json(_) => ErrorCode::ParseError,
            BridgeError::MethodNotSupported(_) => ErrorCode::MethodNotFound,
            BridgeError::UnknownTerminal(_) => ErrorCode::UnknownTerminal,
            BridgeError::ProcessExited => ErrorCode::ProcessExited,
            BridgeError::Rpc(e) => match e.code {
                -32700 => ErrorCode::ParseError,
                -32600 => ErrorCode::InvalidRequest,
                -32601 => ErrorCode::MethodNotFound,
                -32602 => ErrorCode::InvalidParams,
                _ => ErrorCode::InternalError,
            },
            _ => ErrorCode::InternalError,
        }
    }

    /// Convert into a JSON-RPC error object for a wire response
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            BridgeError::Rpc(e) => e.clone(),
            other => RpcError::new(other.error_code().code(), other.to_string()),
        }
    }

    /// Check if this error is fatal for the whole bridge (vs. one call)
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::AgentNotFound(_) | BridgeError::Spawn(_))
    }

    // === Constructor helpers ===

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        BridgeError::Internal(msg.into())
    }

    /// Create a pipe error
    pub fn pipe(msg: impl Into<String>) -> Self {
        BridgeError::Pipe(msg.into())
    }

    /// Create a malformed-message error
    pub fn malformed(msg: impl Into<String>) -> Self {
        BridgeError::MalformedMessage(msg.into())
    }

    /// Create an unknown-terminal error
    pub fn unknown_terminal(id: impl Into<String>) -> Self {
        BridgeError::UnknownTerminal(id.into())
    }

    /// Create a method-not-supported error
    pub fn method_not_supported(method: impl Into<String>) -> Self {
        BridgeError::MethodNotSupported(method.into())
    }
}
