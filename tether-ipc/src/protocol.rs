//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::IpcError;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Requests sent from the host to the worker.
///
/// One variant per supported operation; new operations are added as new
/// variants rather than by loosening the existing ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Install a calculator in the worker. The payload is opaque to Tether.
    SetupCalculator { calculator: JsonValue },
}

impl WorkerRequest {
    /// Build a `setup_calculator` request from any serializable value
    pub fn setup_calculator<T: Serialize + ?Sized>(calculator: &T) -> Result<Self, IpcError> {
        let calculator = serde_json::to_value(calculator)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;
        Ok(WorkerRequest::SetupCalculator { calculator })
    }

    /// Wire tag of this request
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerRequest::SetupCalculator { .. } => "setup_calculator",
        }
    }
}

/// Connection handshake messages.
///
/// The worker opens every connection with a [`Handshake::Greeting`]. When it
/// carries a challenge the client must answer with the HMAC of the challenge
/// under the pre-shared key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Handshake {
    /// First frame on every connection
    Greeting { challenge: Option<String> },

    /// Client's answer to a challenge
    Answer { digest: String },

    /// Key accepted
    Welcome,

    /// Key rejected; the worker closes the connection after sending this
    Rejected { reason: String },
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

/// Reply from the worker. Its shape is defined by the worker.
pub type ResponseEnvelope = MessageEnvelope<JsonValue>;

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }

    /// Unwrap the message
    pub fn into_message(self) -> T {
        self.message
    }
}
