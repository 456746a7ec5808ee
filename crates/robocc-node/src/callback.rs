//! The controller's callback, as seen from an agent.

use async_trait::async_trait;
use robocc_protocol::{PeerConnection, ProtocolError};
use robocc_types::{AgentRef, ControllerId, Request};

use crate::service::expect_ack;

/// A subscribed controller that an agent can notify.
#[async_trait]
pub trait Callback: Send + Sync + 'static {
    /// Identity used to match unregister requests against the subscriber.
    fn controller_id(&self) -> ControllerId;

    /// Tell the controller that `agent` is going away.
    async fn unsubscribe_agent(&self, agent: &AgentRef) -> Result<(), ProtocolError>;
}

/// A controller reached over the connection its registration arrived on.
pub struct RemoteCallback {
    controller: ControllerId,
    connection: PeerConnection,
}

impl RemoteCallback {
    pub fn new(controller: ControllerId, connection: PeerConnection) -> Self {
        Self {
            controller,
            connection,
        }
    }
}

#[async_trait]
impl Callback for RemoteCallback {
    fn controller_id(&self) -> ControllerId {
        self.controller
    }

    async fn unsubscribe_agent(&self, agent: &AgentRef) -> Result<(), ProtocolError> {
        let response = self
            .connection
            .call(&Request::UnsubscribeAgent {
                agent: agent.clone(),
            })
            .await?;
        expect_ack(response)
    }
}
