//! Worker side of the protocol
//!
//! Used by the reference worker binary and by tests that stand in for a
//! worker. A worker built in another language only has to speak the same
//! frames.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::auth::{new_challenge, AuthKey};
use crate::endpoint::Endpoint;
use crate::error::IpcError;
use crate::protocol::{Handshake, MessageEnvelope, WorkerRequest};
use crate::transport::{IpcTransport, TcpTransport, DEFAULT_MAX_FRAME_BYTES};

/// Handles decoded requests on behalf of a worker
#[async_trait]
pub trait RequestHandler: Send {
    /// Produce the acknowledgment for one request
    async fn handle(&mut self, request: WorkerRequest) -> JsonValue;

    /// Acknowledgment for a frame that could not be decoded
    fn reject(&mut self, error: &IpcError) -> JsonValue {
        serde_json::json!({"status": "error", "message": error.to_string()})
    }
}

/// How long a client may take to finish the handshake, and then to send its request
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Listening socket of a worker
pub struct WorkerListener {
    listener: TcpListener,
    authkey: Option<AuthKey>,
    max_frame_bytes: usize,
    client_timeout: Duration,
}

impl WorkerListener {
    /// Bind to `endpoint`. Port 0 picks a free port.
    pub async fn bind(endpoint: &Endpoint, authkey: Option<AuthKey>) -> Result<Self, IpcError> {
        let listener = TcpListener::bind(endpoint.as_socket_tuple())
            .await
            .map_err(|source| IpcError::BindFailed {
                endpoint: endpoint.to_string(),
                source,
            })?;

        info!(
            "Worker listening on {} (authentication {})",
            endpoint,
            if authkey.is_some() { "required" } else { "disabled" }
        );

        Ok(Self {
            listener,
            authkey,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
        })
    }

    /// Bound the handshake and the request read of every connection
    pub fn with_client_timeout(mut self, client_timeout: Duration) -> Self {
        self.client_timeout = client_timeout;
        self
    }

    /// Set the largest frame accepted from clients
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Address actually bound
    pub fn local_endpoint(&self) -> Result<Endpoint, IpcError> {
        let addr = self.listener.local_addr()?;
        Ok(Endpoint::new(addr.ip().to_string(), addr.port()))
    }

    /// Accept one connection and run the greeting/authentication handshake
    pub async fn accept(&self) -> Result<WorkerConnection, IpcError> {
        let (stream, peer) = self.listener.accept().await?;
        let _ = stream.set_nodelay(true);
        debug!("Accepted connection from {}", peer);

        let mut transport = TcpTransport::with_max_frame_bytes(stream, self.max_frame_bytes);
        let handshake = timeout(
            self.client_timeout,
            server_handshake(&mut transport, self.authkey.as_ref()),
        )
        .await
        .unwrap_or(Err(IpcError::Timeout(self.client_timeout)));
        if let Err(e) = handshake {
            let _ = transport.close().await;
            return Err(e);
        }

        Ok(WorkerConnection {
            transport,
            peer,
            read_timeout: self.client_timeout,
        })
    }

    /// Accept connections and dispatch requests to `handler` until `shutdown`
    /// resolves. Connections are served one at a time.
    pub async fn serve<H, F>(&self, handler: &mut H, shutdown: F) -> Result<(), IpcError>
    where
        H: RequestHandler + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            // A stalled client must not delay shutdown
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Worker listener shutting down");
                    return Ok(());
                }
                _ = self.serve_next(handler) => {}
            }
        }
    }

    async fn serve_next<H>(&self, handler: &mut H)
    where
        H: RequestHandler + ?Sized,
    {
        match self.accept().await {
            Ok(mut connection) => {
                if let Err(e) = connection.serve_one(handler).await {
                    warn!("Connection from {} failed: {}", connection.peer(), e);
                }
            }
            Err(IpcError::IoError(e)) => {
                error!("Failed to accept connection: {}", e);
            }
            Err(e) => {
                warn!("Handshake with client failed: {}", e);
            }
        }
    }
}

/// One authenticated client connection
pub struct WorkerConnection {
    transport: TcpTransport,
    peer: SocketAddr,
    read_timeout: Duration,
}

impl WorkerConnection {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Next request, or `None` once the client has closed the connection
    pub async fn next_request(&mut self) -> Result<Option<WorkerRequest>, IpcError> {
        let received = timeout(
            self.read_timeout,
            self.transport.receive_optional::<WorkerRequest>(),
        )
        .await
        .map_err(|_| IpcError::Timeout(self.read_timeout))??;
        Ok(received.map(MessageEnvelope::into_message))
    }

    /// Send an acknowledgment
    pub async fn respond<T: Serialize + Send + Sync>(&mut self, response: &T) -> Result<(), IpcError> {
        self.transport.send(&MessageEnvelope::new(response)).await
    }

    /// Serve a single request/response exchange, then close
    pub async fn serve_one<H>(&mut self, handler: &mut H) -> Result<(), IpcError>
    where
        H: RequestHandler + ?Sized,
    {
        let response = match self.next_request().await {
            Ok(Some(request)) => {
                debug!("Handling {} from {}", request.kind(), self.peer);
                handler.handle(request).await
            }
            Ok(None) => {
                // Readiness probes connect, authenticate and leave
                debug!("Client {} closed without a request", self.peer);
                return self.close().await;
            }
            Err(e @ IpcError::DeserializationError(_)) => handler.reject(&e),
            Err(e) => {
                let _ = self.close().await;
                return Err(e);
            }
        };

        let result = self.respond(&response).await;
        let _ = self.close().await;
        result
    }

    pub async fn close(&mut self) -> Result<(), IpcError> {
        self.transport.close().await
    }
}

/// Worker half of the connection handshake
async fn server_handshake(
    transport: &mut TcpTransport,
    authkey: Option<&AuthKey>,
) -> Result<(), IpcError> {
    let Some(key) = authkey else {
        return transport
            .send(&MessageEnvelope::new(Handshake::Greeting { challenge: None }))
            .await;
    };

    let challenge = new_challenge();
    transport
        .send(&MessageEnvelope::new(Handshake::Greeting {
            challenge: Some(challenge.clone()),
        }))
        .await?;

    let answer: MessageEnvelope<Handshake> = transport.receive().await?;
    let verdict = match answer.message {
        Handshake::Answer { digest } => key.verify(&challenge, &digest),
        other => Err(IpcError::InvalidMessage(format!(
            "expected answer, got {:?}",
            other
        ))),
    };

    match verdict {
        Ok(()) => transport.send(&MessageEnvelope::new(Handshake::Welcome)).await,
        Err(e) => {
            let _ = transport
                .send(&MessageEnvelope::new(Handshake::Rejected {
                    reason: e.to_string(),
                }))
                .await;
            Err(e)
        }
    }
}
