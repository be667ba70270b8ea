//! Inter-process communication for Tether
//!
//! This crate provides the wire protocol spoken between the host application
//! and a supervised worker: versioned newline-delimited JSON frames, the
//! pre-shared key handshake, the client side ([`PayloadChannel`]) and the
//! worker side ([`WorkerListener`]).

pub mod auth;
pub mod channel;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use auth::{AuthKey, AUTHKEY_ENV_VAR};
pub use channel::{ChannelOptions, PayloadChannel};
pub use endpoint::{Endpoint, EndpointParseError};
pub use error::{ErrorCategory, IpcError};
pub use listener::{RequestHandler, WorkerConnection, WorkerListener, DEFAULT_CLIENT_TIMEOUT};
pub use protocol::{
    Handshake, MessageEnvelope, ResponseEnvelope, WorkerRequest, IPC_PROTOCOL_VERSION,
};
pub use transport::{IpcTransport, LineTransport, TcpTransport, DEFAULT_MAX_FRAME_BYTES};
