//! QUIC transport layer and wire protocol for robocc.
//!
//! This crate handles QUIC endpoint management (via quinn), message
//! serialisation/deserialisation (via bincode v2), and the one-stream-per-call
//! request/response primitive both agents and controllers are built on.

pub mod connection;
pub mod error;
pub mod tls;
pub mod transport;
pub mod wire;

pub use connection::{MessageReceiver, MessageSender, PeerConnection, CALL_TIMEOUT};
pub use error::ProtocolError;
pub use transport::QuicTransport;
