//! IPC transport implementations

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::trace;

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Upper bound on a single frame unless configured otherwise
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// IPC transport trait for different communication mechanisms
#[async_trait]
pub trait IpcTransport: Send {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError>;

    /// Receive a message from the other end
    async fn receive<T: DeserializeOwned + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), IpcError>;
}

/// Newline-delimited JSON over any byte stream.
///
/// Each frame is one [`MessageEnvelope`] serialized on a single line.
pub struct LineTransport<S> {
    stream: Option<BufReader<S>>,
    max_frame_bytes: usize,
}

/// Transport over a TCP connection
pub type TcpTransport = LineTransport<TcpStream>;

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a new transport over `stream`
    pub fn new(stream: S) -> Self {
        Self::with_max_frame_bytes(stream, DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a new transport with a custom frame size limit
    pub fn with_max_frame_bytes(stream: S, max_frame_bytes: usize) -> Self {
        Self {
            stream: Some(BufReader::new(stream)),
            max_frame_bytes,
        }
    }

    /// Whether [`IpcTransport::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Read one raw frame. `Ok(None)` means the peer closed cleanly between frames.
    async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, IpcError> {
        let max_frame_bytes = self.max_frame_bytes;
        let reader = self.stream.as_mut().ok_or(IpcError::ConnectionClosed)?;

        let mut frame = Vec::new();
        // One byte past the limit tells an oversized frame from a full one
        let limit = u64::try_from(max_frame_bytes)
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        let received = (&mut *reader)
            .take(limit)
            .read_until(b'\n', &mut frame)
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;

        if received == 0 {
            return Ok(None);
        }

        if frame.last() != Some(&b'\n') {
            if frame.len() > max_frame_bytes {
                return Err(IpcError::FrameTooLarge {
                    limit: max_frame_bytes,
                });
            }
            return Err(IpcError::TruncatedFrame { received });
        }

        frame.pop();
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }
        trace!("Received frame of {} bytes", frame.len());
        Ok(Some(frame))
    }

    /// Receive a message, treating a clean close as `Ok(None)`
    pub async fn receive_optional<T: DeserializeOwned + Send>(
        &mut self,
    ) -> Result<Option<MessageEnvelope<T>>, IpcError> {
        let Some(frame) = self.read_frame().await? else {
            return Ok(None);
        };

        let envelope: MessageEnvelope<JsonValue> = serde_json::from_slice(&frame)
            .map_err(|e| IpcError::InvalidMessage(e.to_string()))?;

        // Check protocol version compatibility before looking at the body
        if !envelope.is_compatible() {
            return Err(IpcError::ProtocolVersionMismatch {
                expected: IPC_PROTOCOL_VERSION,
                actual: envelope.protocol_version,
            });
        }

        let message = serde_json::from_value(envelope.message)
            .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

        Ok(Some(MessageEnvelope {
            protocol_version: envelope.protocol_version,
            timestamp: envelope.timestamp,
            message,
        }))
    }
}

#[async_trait]
impl<S> IpcTransport for LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        let mut frame = serde_json::to_vec(message)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;
        if frame.len() > self.max_frame_bytes {
            return Err(IpcError::FrameTooLarge {
                limit: self.max_frame_bytes,
            });
        }
        // Send with newline delimiter
        frame.push(b'\n');

        let stream = self.stream.as_mut().ok_or(IpcError::ConnectionClosed)?;
        stream
            .write_all(&frame)
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| IpcError::IoError(e.to_string()))?;

        trace!("Sent frame of {} bytes", frame.len());
        Ok(())
    }

    async fn receive<T: DeserializeOwned + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        self.receive_optional().await?.ok_or(IpcError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        // Take ownership and drop to close
        if let Some(mut stream) = self.stream.take() {
            stream
                .shutdown()
                .await
                .map_err(|e| IpcError::IoError(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WorkerRequest;
    use serde_json::json;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_send_receive_over_duplex() {
        let (client, server) = duplex(4096);
        let mut client = LineTransport::new(client);
        let mut server = LineTransport::new(server);

        let request = WorkerRequest::setup_calculator(&json!({"method": "gfn2"})).unwrap();
        client.send(&MessageEnvelope::new(request.clone())).await.unwrap();

        let received: MessageEnvelope<WorkerRequest> = server.receive().await.unwrap();
        assert_eq!(received.message, request);
    }

    #[tokio::test]
    async fn test_unbounded_frame_limit() {
        let (client, server) = duplex(4096);
        let mut client = LineTransport::new(client);
        let mut server = LineTransport::with_max_frame_bytes(server, usize::MAX);

        client
            .send(&MessageEnvelope::new(json!({"status": "ok"})))
            .await
            .unwrap();
        let received: MessageEnvelope<JsonValue> = server.receive().await.unwrap();
        assert_eq!(received.message, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_clean_close_between_frames() {
        let (client, server) = duplex(1024);
        let mut client = LineTransport::new(client);
        let mut server = LineTransport::new(server);

        client.close().await.unwrap();
        assert!(client.is_closed());

        let received = server.receive_optional::<JsonValue>().await.unwrap();
        assert!(received.is_none());
        assert!(matches!(
            server.receive::<JsonValue>().await,
            Err(IpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame() {
        let (mut raw, server) = duplex(1024);
        let mut server = LineTransport::new(server);

        raw.write_all(br#"{"protocol_version":1,"timest"#).await.unwrap();
        drop(raw);

        let result = server.receive::<JsonValue>().await;
        assert!(matches!(result, Err(IpcError::TruncatedFrame { .. })));
    }

    #[tokio::test]
    async fn test_garbled_frame() {
        let (mut raw, server) = duplex(1024);
        let mut server = LineTransport::new(server);

        raw.write_all(b"\x00\x01 not json\n").await.unwrap();

        let result = server.receive::<JsonValue>().await;
        assert!(matches!(result, Err(IpcError::InvalidMessage(_))));
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (mut raw, server) = duplex(1024);
        let mut server = LineTransport::new(server);

        raw.write_all(
            b"{\"protocol_version\":99,\"timestamp\":\"2024-01-01T00:00:00Z\",\"message\":{}}\n",
        )
        .await
        .unwrap();

        let result = server.receive::<JsonValue>().await;
        assert!(matches!(
            result,
            Err(IpcError::ProtocolVersionMismatch {
                expected: IPC_PROTOCOL_VERSION,
                actual: 99
            })
        ));
    }

    #[tokio::test]
    async fn test_frame_too_large() {
        let (client, server) = duplex(64 * 1024);
        let mut client = LineTransport::new(client);
        let mut server = LineTransport::with_max_frame_bytes(server, 128);

        let payload = "x".repeat(1024);
        client.send(&MessageEnvelope::new(json!(payload))).await.unwrap();

        let result = server.receive::<JsonValue>().await;
        assert!(matches!(result, Err(IpcError::FrameTooLarge { limit: 128 })));
    }

    #[tokio::test]
    async fn test_send_refuses_oversized_frame() {
        let (client, _server) = duplex(1024);
        let mut client = LineTransport::with_max_frame_bytes(client, 16);

        let result = client
            .send(&MessageEnvelope::new(json!({"calculator": "too long for the limit"})))
            .await;
        assert!(matches!(result, Err(IpcError::FrameTooLarge { limit: 16 })));
    }

    #[tokio::test]
    async fn test_wrong_message_shape() {
        let (client, server) = duplex(1024);
        let mut client = LineTransport::new(client);
        let mut server = LineTransport::new(server);

        client
            .send(&MessageEnvelope::new(json!({"type": "evaluate"})))
            .await
            .unwrap();

        let result = server.receive::<WorkerRequest>().await;
        assert!(matches!(result, Err(IpcError::DeserializationError(_))));
    }
}
