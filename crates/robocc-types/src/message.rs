//! Protocol message types.
//!
//! Every remote call is a single [`Request`] answered by a single
//! [`Response`] on its own QUIC stream.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::agent::AgentRef;
use crate::identity::ControllerId;

/// Current protocol version.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 0, minor: 1 };

/// Well-known name the agent endpoint is bound under.
pub const AGENT_SERVICE_NAME: &str = "robocc.agent";

/// Default port an agent listens on for control centers.
pub const DEFAULT_PORT: u16 = 1976;

/// Protocol version for compatibility negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Whether a peer speaking `other` can be talked to.
    pub fn is_compatible(self, other: ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Inbound calls. Agents serve the first three, controllers the last.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub enum Request {
    /// Resolve a service bound on the remote endpoint.
    Lookup {
        version: ProtocolVersion,
        service: String,
    },

    /// Subscribe the calling controller to the agent.
    RegisterCallback { controller: ControllerId },

    /// Unsubscribe the calling controller from the agent.
    UnregisterCallback { controller: ControllerId },

    /// The agent is shutting down (agent -> controller).
    UnsubscribeAgent { agent: AgentRef },
}

impl Request {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lookup { .. } => "lookup",
            Self::RegisterCallback { .. } => "register_callback",
            Self::UnregisterCallback { .. } => "unregister_callback",
            Self::UnsubscribeAgent { .. } => "unsubscribe_agent",
        }
    }
}

/// Replies to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub enum Response {
    /// The looked-up service is bound and belongs to `agent`.
    Bound {
        version: ProtocolVersion,
        agent: AgentRef,
    },

    /// Nothing is bound under the requested name.
    NotBound { service: String },

    /// The call was handled.
    Ack,

    /// The call is not served by this endpoint.
    Rejected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AgentId;

    fn bincode_roundtrip<T: Encode + Decode<()> + std::fmt::Debug>(value: &T) -> T {
        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(value, config).unwrap();
        let (decoded, _): (T, _) = bincode::decode_from_slice(&bytes, config).unwrap();
        decoded
    }

    #[test]
    fn register_callback_keeps_controller() {
        let controller = ControllerId::new();
        match bincode_roundtrip(&Request::RegisterCallback { controller }) {
            Request::RegisterCallback { controller: decoded } => assert_eq!(decoded, controller),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn bound_response_keeps_agent() {
        let agent = AgentRef {
            id: AgentId::new(),
            name: "rover".to_string(),
            pid: 7,
            port: DEFAULT_PORT,
        };
        let msg = Response::Bound {
            version: PROTOCOL_VERSION,
            agent: agent.clone(),
        };
        match bincode_roundtrip(&msg) {
            Response::Bound { version, agent: decoded } => {
                assert_eq!(version, PROTOCOL_VERSION);
                assert_eq!(decoded, agent);
                assert_eq!(decoded.port, 1976);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn request_kind_names() {
        let controller = ControllerId::new();
        assert_eq!(Request::UnregisterCallback { controller }.kind(), "unregister_callback");
        let lookup = Request::Lookup {
            version: PROTOCOL_VERSION,
            service: AGENT_SERVICE_NAME.to_string(),
        };
        assert_eq!(lookup.kind(), "lookup");
    }

    #[test]
    fn version_compatibility_follows_major() {
        let newer_minor = ProtocolVersion { major: 0, minor: 9 };
        let next_major = ProtocolVersion { major: 1, minor: 0 };
        assert!(PROTOCOL_VERSION.is_compatible(newer_minor));
        assert!(!PROTOCOL_VERSION.is_compatible(next_major));
    }

    #[test]
    fn protocol_version_display() {
        assert_eq!(PROTOCOL_VERSION.to_string(), "0.1");
    }
}
