//! MCP-specific error types.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::protocol::JsonRpcError;

/// Errors produced while decoding or encoding a wire envelope.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The line is not valid JSON.
    #[error("parse error: {0}")]
    Parse(#[source] serde_json::Error),

    /// Valid JSON that is not a JSON-RPC envelope.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The envelope could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CodecError {
    /// JSON-RPC error code reported back to the peer.
    pub fn code(&self) -> i32 {
        match self {
            CodecError::Parse(_) => JsonRpcError::PARSE_ERROR,
            CodecError::InvalidRequest(_) => JsonRpcError::INVALID_REQUEST,
            CodecError::Encode(_) => JsonRpcError::INTERNAL_ERROR,
        }
    }

    /// Error object for the response to an undecodable line.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            CodecError::Parse(e) => JsonRpcError::parse_error(e.to_string()),
            CodecError::InvalidRequest(msg) => JsonRpcError::invalid_request(msg.clone()),
            CodecError::Encode(e) => JsonRpcError::internal_error(e.to_string()),
        }
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// The read loop has already been started.
    #[error("transport already started")]
    AlreadyStarted,

    /// Failed to terminate the process.
    #[error("failed to terminate process: {0}")]
    TerminateFailed(std::io::Error),
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Envelope could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Protocol-level error (unexpected payloads, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No connection exists or can be made for the named server.
    #[error("server not connected: {0}")]
    ServerNotConnected(String),

    /// Server initialization failed.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// Server returned an error response.
    #[error("server error (code {code}): {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection is not in the correct state.
    #[error("invalid connection state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The call's deadline passed before a response arrived.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The caller abandoned the call.
    #[error("request cancelled")]
    Cancelled,

    /// Malformed `skill://` URI.
    #[error("invalid resource URI: {0}")]
    InvalidUri(String),

    /// Well-formed URI that names no readable resource.
    #[error("unknown resource: {0}")]
    UnknownResource(String),
}

impl McpError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an initialization failed error.
    pub fn init_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a server error from a JSON-RPC error object.
    pub fn server_error(error: JsonRpcError) -> Self {
        Self::ServerError {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Whether the caller gave up, as opposed to the call failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout(_))
    }

    /// JSON-RPC error code, when the peer reported one.
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            Self::ServerError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<McpError> for opskills_core::Error {
    fn from(e: McpError) -> Self {
        if e.is_cancellation() {
            opskills_core::Error::Cancelled(e.to_string())
        } else {
            opskills_core::Error::Mcp(e.to_string())
        }
    }
}
