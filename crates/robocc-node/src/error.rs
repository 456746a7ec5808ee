//! Node errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("already running")]
    AlreadyRunning,

    #[error("not running")]
    NotRunning,

    #[error("protocol error: {0}")]
    Protocol(#[from] robocc_protocol::ProtocolError),

    #[error("certificate error: {0}")]
    Certgen(#[from] robocc_certgen::CertgenError),

    #[error("agent {0} unsubscribed before the connection completed")]
    Unsubscribed(String),
}
