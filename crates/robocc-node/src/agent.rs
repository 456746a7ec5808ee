//! Agent process: owns the endpoint and its listener.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use robocc_protocol::{PeerConnection, QuicTransport};
use robocc_types::{AgentRef, Request, Response, PROTOCOL_VERSION};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::callback::RemoteCallback;
use crate::endpoint::AgentEndpoint;
use crate::error::NodeError;
use crate::service::{spawn_accept_loop, Service};

/// A hardware-side agent process.
///
/// [`start`](Agent::start) binds the listener and makes the endpoint
/// reachable; [`stop`](Agent::stop) tells the subscribed controller, if any,
/// and then unbinds.
pub struct Agent {
    bind: SocketAddr,
    cert_pem: String,
    key_pem: String,
    endpoint: Arc<AgentEndpoint>,
    transport: Option<QuicTransport>,
    accept_task: Option<JoinHandle<()>>,
}

impl Agent {
    pub fn new(
        bind: SocketAddr,
        name: impl Into<String>,
        pid: u32,
        cert_pem: String,
        key_pem: String,
    ) -> Self {
        Self {
            bind,
            cert_pem,
            key_pem,
            endpoint: Arc::new(AgentEndpoint::new(name, pid)),
            transport: None,
            accept_task: None,
        }
    }

    pub fn endpoint(&self) -> &Arc<AgentEndpoint> {
        &self.endpoint
    }

    pub fn agent_ref(&self) -> AgentRef {
        self.endpoint.agent_ref()
    }

    /// Address the listener is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport
            .as_ref()
            .and_then(|transport| transport.local_addr().ok())
    }

    /// Bind the listener and start serving calls.
    ///
    /// Any failure leaves the agent unbound; the caller is expected to abort.
    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.transport.is_some() {
            return Err(NodeError::AlreadyRunning);
        }

        let transport = QuicTransport::bind(self.bind, &self.cert_pem, &self.key_pem)?;
        let port = match transport.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                transport.close();
                return Err(e.into());
            }
        };
        if let Err(e) = self.endpoint.bind(port) {
            transport.close();
            return Err(e);
        }

        let service = Arc::new(AgentService {
            endpoint: Arc::clone(&self.endpoint),
        });
        self.accept_task = Some(spawn_accept_loop(transport.clone(), service));
        self.transport = Some(transport);

        let agent = self.endpoint.agent_ref();
        info!(pid = agent.pid, port, name = %agent.name, id = %agent.id, "agent started");
        Ok(())
    }

    /// Notify the subscriber, then unbind. Always completes once started.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        let transport = self.transport.take().ok_or(NodeError::NotRunning)?;
        let agent = self.endpoint.agent_ref();

        let notified = match self.endpoint.current_callback() {
            Some(callback) => {
                let controller = callback.controller_id();
                match callback.unsubscribe_agent(&agent).await {
                    Ok(()) => info!(controller = %controller, "notified controller of shutdown"),
                    Err(e) => {
                        warn!(controller = %controller, error = %e, "failed to notify controller of shutdown");
                    }
                }
                Some(controller)
            }
            None => None,
        };

        if let Some(late) = self.endpoint.unbind() {
            let controller = late.controller_id();
            if notified != Some(controller) {
                warn!(controller = %controller, "dropping controller that subscribed during shutdown");
            }
        }

        transport.close();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }

        info!(pid = agent.pid, port = agent.port, "agent stopped");
        Ok(())
    }

    /// Start, wait for `shutdown`, then stop.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), NodeError>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        shutdown.await;
        self.stop().await
    }
}

/// Serves the agent-facing calls.
struct AgentService {
    endpoint: Arc<AgentEndpoint>,
}

#[async_trait]
impl Service for AgentService {
    async fn handle(&self, request: Request, connection: &PeerConnection) -> Response {
        match request {
            Request::Lookup { version, service } => {
                if !PROTOCOL_VERSION.is_compatible(version) {
                    warn!(remote = %version, local = %PROTOCOL_VERSION, "incompatible controller");
                    return Response::Rejected {
                        reason: format!("incompatible protocol version {version}"),
                    };
                }
                match self.endpoint.lookup(&service) {
                    Some(agent) => Response::Bound {
                        version: PROTOCOL_VERSION,
                        agent,
                    },
                    None => Response::NotBound { service },
                }
            }
            Request::RegisterCallback { controller } => {
                let callback = Arc::new(RemoteCallback::new(controller, connection.clone()));
                match self.endpoint.register_callback(callback) {
                    Ok(_) => Response::Ack,
                    Err(e) => Response::Rejected {
                        reason: e.to_string(),
                    },
                }
            }
            Request::UnregisterCallback { controller } => {
                // Policy violations are logged by the endpoint, never returned.
                self.endpoint.unregister_callback(controller);
                Response::Ack
            }
            Request::UnsubscribeAgent { agent } => {
                warn!(from = %agent, "agent received a controller-only call");
                Response::Rejected {
                    reason: "unsubscribe_agent is served by controllers".to_string(),
                }
            }
        }
    }
}
