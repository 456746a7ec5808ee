//! QUIC transport: bind, accept, resolve, and connect.

use std::net::SocketAddr;

use quinn::Endpoint;
use tracing::{debug, info};

use crate::connection::PeerConnection;
use crate::error::ProtocolError;
use crate::tls;

/// Server name presented during the TLS handshake.
pub const SERVER_NAME: &str = "robocc";

/// QUIC transport layer for robocc.
///
/// A single endpoint acts as both server (accepting connections) and client
/// (connecting to peers). Binding it is what makes an agent or a control
/// center reachable; closing it makes it unreachable.
#[derive(Clone)]
pub struct QuicTransport {
    endpoint: Endpoint,
}

impl QuicTransport {
    /// Bind a QUIC endpoint that can both accept and initiate connections.
    ///
    /// Fails if the address is already in use.
    pub fn bind(addr: SocketAddr, cert_pem: &str, key_pem: &str) -> Result<Self, ProtocolError> {
        // Install the default crypto provider if not already done
        let _ = rustls::crypto::ring::default_provider().install_default();

        let server_config = tls::server_config(cert_pem, key_pem)?;
        let client_config = tls::client_config_skip_verification()?;

        let mut endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ProtocolError::Connection(format!("failed to bind {addr}: {e}")))?;
        endpoint.set_default_client_config(client_config);

        info!(addr = %addr, "QUIC transport bound");
        Ok(Self { endpoint })
    }

    /// Accept an incoming connection.
    ///
    /// Returns `Ok(None)` once the endpoint has been closed; an `Err` only
    /// means this particular handshake failed.
    pub async fn accept(&self) -> Result<Option<PeerConnection>, ProtocolError> {
        let Some(incoming) = self.endpoint.accept().await else {
            return Ok(None);
        };

        let connection = incoming
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;

        let remote = connection.remote_address();
        debug!(remote = %remote, "accepted connection");
        Ok(Some(PeerConnection::new(connection)))
    }

    /// Resolve `host:port` to the first matching socket address.
    pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ProtocolError> {
        let target = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        let first = tokio::net::lookup_host(target.clone())
            .await
            .map_err(|e| ProtocolError::Resolve(format!("{target}: {e}")))?
            .next();
        first.ok_or(ProtocolError::Resolve(target))
    }

    /// Connect to a remote peer.
    pub async fn connect(&self, addr: SocketAddr) -> Result<PeerConnection, ProtocolError> {
        let connection = self
            .endpoint
            .connect(addr, SERVER_NAME)
            .map_err(|e| ProtocolError::Connection(e.to_string()))?
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;

        debug!(remote = %addr, "connected to peer");
        Ok(PeerConnection::new(connection))
    }

    /// Get the local address this transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ProtocolError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    }

    /// Gracefully shut down the transport, closing every connection.
    pub fn close(&self) {
        self.endpoint.close(quinn::VarInt::from_u32(0), b"shutdown");
        info!("QUIC transport closed");
    }
}
