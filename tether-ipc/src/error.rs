//! IPC error types

use std::time::Duration;
use thiserror::Error;

/// Coarse classification of an [`IpcError`], matching how callers are
/// expected to react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The worker could not be reached or the connection broke
    Connection,
    /// A value could not be encoded or a reply could not be decoded
    Serialization,
    /// The peer sent something that does not follow the protocol
    Protocol,
    /// The pre-shared key handshake failed
    Authentication,
}

/// IPC error types
#[derive(Debug, Error)]
pub enum IpcError {
    /// Connecting to the worker failed (refused, unreachable, bad address)
    #[error("Failed to connect to {endpoint}: {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Connecting to the worker did not finish in time
    #[error("Timed out after {timeout:?} connecting to {endpoint}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    /// Binding the worker listener failed
    #[error("Failed to bind {endpoint}: {source}")]
    BindFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The peer closed the connection in the middle of a frame
    #[error("Truncated frame: connection closed after {received} bytes without a terminator")]
    TruncatedFrame { received: usize },

    /// A frame exceeded the configured limit
    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    /// Timeout waiting for response
    #[error("Timed out after {0:?} waiting for response")]
    Timeout(Duration),

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// The worker demands a key the client does not have
    #[error("Worker requires authentication but no key was supplied")]
    AuthenticationRequired,

    /// The key handshake failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
}

impl IpcError {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            IpcError::ConnectFailed { .. }
            | IpcError::ConnectTimeout { .. }
            | IpcError::BindFailed { .. }
            | IpcError::IoError(_)
            | IpcError::ConnectionClosed
            | IpcError::Timeout(_) => ErrorCategory::Connection,
            IpcError::SerializationError(_) | IpcError::DeserializationError(_) => {
                ErrorCategory::Serialization
            }
            IpcError::TruncatedFrame { .. }
            | IpcError::FrameTooLarge { .. }
            | IpcError::ProtocolVersionMismatch { .. }
            | IpcError::InvalidMessage(_) => ErrorCategory::Protocol,
            IpcError::AuthenticationRequired | IpcError::AuthenticationFailed(_) => {
                ErrorCategory::Authentication
            }
        }
    }

    /// Whether the worker was unreachable or the connection broke
    pub fn is_connection_error(&self) -> bool {
        self.category() == ErrorCategory::Connection
    }

    /// Check if this error is retryable.
    ///
    /// Nothing in this crate retries; this is a hint for callers that layer
    /// their own retry policy on top.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IpcError::ConnectFailed { .. }
                | IpcError::ConnectTimeout { .. }
                | IpcError::IoError(_)
                | IpcError::Timeout(_)
                | IpcError::ConnectionClosed
        )
    }

    /// Check if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::ProtocolVersionMismatch { .. }
                | IpcError::InvalidMessage(_)
                | IpcError::AuthenticationFailed(_)
                | IpcError::AuthenticationRequired
        )
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        IpcError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else if err.is_data() || err.is_syntax() || err.is_eof() {
            IpcError::DeserializationError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}
