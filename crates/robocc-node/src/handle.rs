//! The control center's handle on a remote agent.

use std::net::SocketAddr;

use robocc_protocol::{PeerConnection, ProtocolError};
use robocc_types::{
    AgentId, AgentRef, ControllerId, Request, Response, AGENT_SERVICE_NAME, PROTOCOL_VERSION,
};

use crate::service::expect_ack;

/// A looked-up agent endpoint.
///
/// Handles compare equal when they refer to the same agent process,
/// regardless of which connection they were obtained over.
#[derive(Clone)]
pub struct AgentHandle {
    agent: AgentRef,
    address: SocketAddr,
    connection: PeerConnection,
}

impl AgentHandle {
    /// Resolve the agent service over `connection`.
    pub(crate) async fn lookup(
        connection: PeerConnection,
        address: SocketAddr,
    ) -> Result<Self, ProtocolError> {
        let response = connection
            .call(&Request::Lookup {
                version: PROTOCOL_VERSION,
                service: AGENT_SERVICE_NAME.to_string(),
            })
            .await?;

        match response {
            Response::Bound { version, agent } => {
                if !PROTOCOL_VERSION.is_compatible(version) {
                    return Err(ProtocolError::VersionMismatch {
                        remote: version.to_string(),
                        local: PROTOCOL_VERSION.to_string(),
                    });
                }
                Ok(Self {
                    agent,
                    address,
                    connection,
                })
            }
            Response::NotBound { service } => Err(ProtocolError::NotBound(service)),
            Response::Rejected { reason } => Err(ProtocolError::Rejected(reason)),
            Response::Ack => Err(ProtocolError::UnexpectedResponse(
                "Ack in reply to lookup".to_string(),
            )),
        }
    }

    pub fn id(&self) -> AgentId {
        self.agent.id
    }

    pub fn agent(&self) -> &AgentRef {
        &self.agent
    }

    /// Address the agent was dialled at.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub async fn register_callback(&self, controller: ControllerId) -> Result<(), ProtocolError> {
        let response = self
            .connection
            .call(&Request::RegisterCallback { controller })
            .await?;
        expect_ack(response)
    }

    pub async fn unregister_callback(&self, controller: ControllerId) -> Result<(), ProtocolError> {
        let response = self
            .connection
            .call(&Request::UnregisterCallback { controller })
            .await?;
        expect_ack(response)
    }

    /// Whether both handles ride on the same connection.
    pub(crate) fn same_connection(&self, other: &AgentHandle) -> bool {
        self.connection.stable_id() == other.connection.stable_id()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    pub(crate) fn close(&self) {
        self.connection.close();
    }
}

impl PartialEq for AgentHandle {
    fn eq(&self, other: &Self) -> bool {
        self.agent.id == other.agent.id
    }
}

impl Eq for AgentHandle {}

impl std::hash::Hash for AgentHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.agent.id.hash(state);
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("agent", &self.agent)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
