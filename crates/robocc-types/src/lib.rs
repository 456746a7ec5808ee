//! Shared types for robocc.
//!
//! This crate contains the types exchanged between a control center and its
//! agents: identity tokens, agent references, and the request/response
//! envelopes of the remote-control protocol.

pub mod agent;
pub mod identity;
pub mod message;

pub use agent::AgentRef;
pub use identity::{AgentId, ControllerId};
pub use message::{
    ProtocolVersion, Request, Response, AGENT_SERVICE_NAME, DEFAULT_PORT, PROTOCOL_VERSION,
};
