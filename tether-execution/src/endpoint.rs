//! Best-effort check that a worker endpoint is free

use std::io;
use std::net::TcpListener;
use tracing::debug;

pub use tether_ipc::Endpoint;

/// What a throwaway bind said about an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    /// A listener could bind; it was released immediately
    Free,
    /// Something is already bound there
    InUse,
    /// Binding failed for another reason, e.g. the host is not local
    Unavailable,
}

/// Observes endpoints without reserving them.
///
/// The probe socket is closed before returning, so another process can take
/// the endpoint between the check and the worker's own bind. The race is
/// accepted: callers that need certainty must rely on the worker failing to
/// bind.
pub struct EndpointGuard;

impl EndpointGuard {
    /// Classify `endpoint` by trying to bind it
    pub fn probe(endpoint: &Endpoint) -> EndpointStatus {
        match TcpListener::bind(endpoint.as_socket_tuple()) {
            Ok(listener) => {
                drop(listener);
                EndpointStatus::Free
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!("Endpoint {} is in use", endpoint);
                EndpointStatus::InUse
            }
            Err(e) => {
                debug!("Endpoint {} is unavailable: {}", endpoint, e);
                EndpointStatus::Unavailable
            }
        }
    }

    /// True unless a listener could bind `endpoint` right now
    pub fn port_in_use(endpoint: &Endpoint) -> bool {
        Self::probe(endpoint) != EndpointStatus::Free
    }
}
