//! Client side of the worker protocol
//!
//! A [`PayloadChannel`] performs exactly one request/response exchange per
//! connection. The connection is closed before `send` returns, whatever the
//! outcome.

use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::auth::AuthKey;
use crate::endpoint::Endpoint;
use crate::error::IpcError;
use crate::protocol::{Handshake, MessageEnvelope, ResponseEnvelope, WorkerRequest};
use crate::transport::{IpcTransport, TcpTransport, DEFAULT_MAX_FRAME_BYTES};

/// Timeouts and limits for a [`PayloadChannel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Bound on connecting plus the greeting/authentication exchange
    pub connect_timeout: Option<Duration>,
    /// Bound on waiting for the reply once the request is written
    pub response_timeout: Option<Duration>,
    /// Largest frame accepted or sent
    pub max_frame_bytes: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            response_timeout: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Ships one envelope to the worker and waits for its acknowledgment
#[derive(Debug, Clone, Default)]
pub struct PayloadChannel {
    options: ChannelOptions,
}

impl PayloadChannel {
    pub fn new(options: ChannelOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Send `request` to the worker at `endpoint` and wait for its reply.
    ///
    /// Nothing is retried here; retry policy belongs to the caller.
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        request: &WorkerRequest,
        authkey: Option<&AuthKey>,
    ) -> Result<ResponseEnvelope, IpcError> {
        let mut transport = self.open(endpoint, authkey).await?;

        let result = self.exchange(&mut transport, request).await;
        if let Err(e) = transport.close().await {
            debug!("Error closing connection to {}: {}", endpoint, e);
        }

        match &result {
            Ok(_) => debug!("Worker at {} acknowledged {}", endpoint, request.kind()),
            Err(e) => warn!("Exchange with worker at {} failed: {}", endpoint, e),
        }
        result
    }

    /// Connect and complete the greeting/authentication, then disconnect.
    ///
    /// Succeeds only once the worker is accepting connections, which makes it
    /// usable as a readiness check.
    pub async fn probe(&self, endpoint: &Endpoint, authkey: Option<&AuthKey>) -> Result<(), IpcError> {
        let mut transport = self.open(endpoint, authkey).await?;
        if let Err(e) = transport.close().await {
            debug!("Error closing probe connection to {}: {}", endpoint, e);
        }
        Ok(())
    }

    async fn open(&self, endpoint: &Endpoint, authkey: Option<&AuthKey>) -> Result<TcpTransport, IpcError> {
        let connect = async {
            let stream = TcpStream::connect(endpoint.as_socket_tuple())
                .await
                .map_err(|source| IpcError::ConnectFailed {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
            let _ = stream.set_nodelay(true);

            let mut transport =
                TcpTransport::with_max_frame_bytes(stream, self.options.max_frame_bytes);
            if let Err(e) = client_handshake(&mut transport, authkey).await {
                let _ = transport.close().await;
                return Err(e);
            }
            Ok::<_, IpcError>(transport)
        };

        match self.options.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| IpcError::ConnectTimeout {
                    endpoint: endpoint.to_string(),
                    timeout,
                })?,
            None => connect.await,
        }
    }

    async fn exchange(
        &self,
        transport: &mut TcpTransport,
        request: &WorkerRequest,
    ) -> Result<ResponseEnvelope, IpcError> {
        transport.send(&MessageEnvelope::new(request)).await?;
        with_timeout(self.options.response_timeout, transport.receive()).await
    }
}

/// Client half of the connection handshake
async fn client_handshake(
    transport: &mut TcpTransport,
    authkey: Option<&AuthKey>,
) -> Result<(), IpcError> {
    let greeting: MessageEnvelope<Handshake> = transport.receive().await?;

    let challenge = match greeting.message {
        Handshake::Greeting { challenge: None } => return Ok(()),
        Handshake::Greeting {
            challenge: Some(challenge),
        } => challenge,
        other => {
            return Err(IpcError::InvalidMessage(format!(
                "expected greeting, got {:?}",
                other
            )))
        }
    };

    let key = authkey.ok_or(IpcError::AuthenticationRequired)?;
    let digest = key.answer(&challenge)?;
    transport
        .send(&MessageEnvelope::new(Handshake::Answer { digest }))
        .await?;

    let verdict: MessageEnvelope<Handshake> = transport.receive().await?;
    match verdict.message {
        Handshake::Welcome => Ok(()),
        Handshake::Rejected { reason } => Err(IpcError::AuthenticationFailed(reason)),
        other => Err(IpcError::InvalidMessage(format!(
            "expected welcome, got {:?}",
            other
        ))),
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    fut: impl Future<Output = Result<T, IpcError>>,
) -> Result<T, IpcError> {
    match timeout {
        Some(duration) => tokio::time::timeout(duration, fut)
            .await
            .map_err(|_| IpcError::Timeout(duration))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ChannelOptions::default();
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(options.response_timeout, None);
        assert_eq!(options.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    }

    #[tokio::test]
    async fn test_send_to_closed_port_is_connection_error() {
        // Grab a free port and release it so nothing listens there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let channel = PayloadChannel::default();
        let request = WorkerRequest::setup_calculator(&42).unwrap();
        let err = channel
            .send(&Endpoint::localhost(port), &request, None)
            .await
            .unwrap_err();

        assert!(err.is_connection_error(), "unexpected error: {}", err);
    }
}
