//! QUIC connection, stream framing, and the call primitive.

use std::net::SocketAddr;
use std::time::Duration;

use bincode::{Decode, Encode};
use quinn::{Connection, RecvStream, SendStream};
use robocc_types::{Request, Response};
use tracing::trace;

use crate::error::ProtocolError;
use crate::wire::{self, MAX_MESSAGE_SIZE};

/// How long a caller waits for the remote side to answer a call.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// A connection to a remote robocc peer.
///
/// Either side may open calls on it: the controller calls the agent it
/// dialled, and the agent calls back into the controller over the same
/// connection.
#[derive(Clone)]
pub struct PeerConnection {
    connection: Connection,
}

impl PeerConnection {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Get the remote address of this connection.
    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Identifier that is stable for the lifetime of the connection.
    pub fn stable_id(&self) -> usize {
        self.connection.stable_id()
    }

    /// Whether the connection has been closed, by either side.
    pub fn is_closed(&self) -> bool {
        self.connection.close_reason().is_some()
    }

    /// Open a bidirectional stream carrying one call.
    pub async fn open_control_stream(
        &self,
    ) -> Result<(MessageSender, MessageReceiver), ProtocolError> {
        let (send, recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        Ok((MessageSender::new(send), MessageReceiver::new(recv)))
    }

    /// Accept a bidirectional stream opened by the peer.
    pub async fn accept_control_stream(
        &self,
    ) -> Result<(MessageSender, MessageReceiver), ProtocolError> {
        let (send, recv) = self.connection.accept_bi().await?;
        Ok((MessageSender::new(send), MessageReceiver::new(recv)))
    }

    /// Issue a call and wait for its response, bounded by [`CALL_TIMEOUT`].
    pub async fn call(&self, request: &Request) -> Result<Response, ProtocolError> {
        self.call_with_timeout(request, CALL_TIMEOUT).await
    }

    /// Issue a call and wait at most `timeout` for its response.
    pub async fn call_with_timeout(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, ProtocolError> {
        let exchange = async {
            let (mut tx, mut rx) = self.open_control_stream().await?;
            tx.send(request).await?;
            tx.finish()?;
            rx.recv::<Response>()
                .await?
                .ok_or(ProtocolError::StreamClosed)
        };

        let response = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ProtocolError::Timeout(timeout))??;
        trace!(call = request.kind(), ?response, "call completed");
        Ok(response)
    }

    /// Close the connection gracefully.
    pub fn close(&self) {
        self.connection.close(quinn::VarInt::from_u32(0), b"bye");
    }
}

/// Sends length-prefixed bincode messages over a QUIC send stream.
pub struct MessageSender {
    stream: SendStream,
}

impl MessageSender {
    fn new(stream: SendStream) -> Self {
        Self { stream }
    }

    /// Send a message, encoding it as length-prefixed bincode.
    pub async fn send<T: Encode>(&mut self, msg: &T) -> Result<(), ProtocolError> {
        let frame = wire::encode_message(msg)?;
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;

        trace!(len = frame.len() - 4, "sent message");
        Ok(())
    }

    /// Finish the stream (signal no more data).
    pub fn finish(mut self) -> Result<(), ProtocolError> {
        self.stream
            .finish()
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    }
}

/// Receives length-prefixed bincode messages from a QUIC recv stream.
pub struct MessageReceiver {
    stream: RecvStream,
}

impl MessageReceiver {
    fn new(stream: RecvStream) -> Self {
        Self { stream }
    }

    /// Receive and decode a message.
    ///
    /// Returns `None` if the stream has been cleanly closed by the peer.
    pub async fn recv<T: Decode<()>>(&mut self) -> Result<Option<T>, ProtocolError> {
        // Read 4-byte length prefix
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(()) => {}
            Err(quinn::ReadExactError::FinishedEarly(_)) => return Ok(None),
            Err(quinn::ReadExactError::ReadError(e)) => {
                return Err(ProtocolError::Connection(e.to_string()));
            }
        }

        let len = u32::from_be_bytes(len_buf);
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::Deserialization(format!(
                "message size {len} exceeds maximum {MAX_MESSAGE_SIZE}"
            )));
        }

        let mut payload = vec![0u8; len as usize];
        match self.stream.read_exact(&mut payload).await {
            Ok(()) => {}
            Err(quinn::ReadExactError::FinishedEarly(_)) => {
                return Err(ProtocolError::StreamClosed);
            }
            Err(quinn::ReadExactError::ReadError(e)) => {
                return Err(ProtocolError::Connection(e.to_string()));
            }
        }

        let msg = wire::decode_message(&payload)?;

        trace!(len, "received message");
        Ok(Some(msg))
    }
}
