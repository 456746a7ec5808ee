//! Control-center connection manager.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use robocc_protocol::{PeerConnection, QuicTransport};
use robocc_types::{AgentId, AgentRef, ControllerId, Request, Response};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::handle::AgentHandle;
use crate::service::{serve_connection, spawn_accept_loop, Service};

/// The set of agents the control center believes it is subscribed to.
#[derive(Clone, Default)]
struct AgentSet {
    inner: Arc<Mutex<HashMap<AgentId, AgentHandle>>>,
}

impl AgentSet {
    fn lock(&self) -> MutexGuard<'_, HashMap<AgentId, AgentHandle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, handle: AgentHandle) -> Option<AgentHandle> {
        self.lock().insert(handle.id(), handle)
    }

    fn get(&self, id: &AgentId) -> Option<AgentHandle> {
        self.lock().get(id).cloned()
    }

    fn remove(&self, id: &AgentId) -> Option<AgentHandle> {
        self.lock().remove(id)
    }

    /// Whether `handle`, on its own connection, is still the stored entry.
    fn holds(&self, handle: &AgentHandle) -> bool {
        is_stored(&self.lock(), handle)
    }

    /// Undo an insert of `handle`, putting `previous` back.
    ///
    /// Returns false, and changes nothing, if the entry has since been
    /// removed or replaced.
    fn restore(&self, handle: &AgentHandle, previous: Option<AgentHandle>) -> bool {
        let mut agents = self.lock();
        if !is_stored(&agents, handle) {
            return false;
        }
        match previous {
            Some(previous) => agents.insert(previous.id(), previous),
            None => agents.remove(&handle.id()),
        };
        true
    }

    fn snapshot(&self) -> Vec<AgentHandle> {
        self.lock().values().cloned().collect()
    }

    fn contains(&self, id: &AgentId) -> bool {
        self.lock().contains_key(id)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

fn is_stored(agents: &HashMap<AgentId, AgentHandle>, handle: &AgentHandle) -> bool {
    agents
        .get(&handle.id())
        .is_some_and(|stored| stored.same_connection(handle))
}

/// Owns the control center's subscriptions and serves its callback endpoint.
///
/// All methods take `&self`; the manager can be shared behind an `Arc`
/// while agents call back into it concurrently.
pub struct ConnectionManager {
    id: ControllerId,
    bind: SocketAddr,
    cert_pem: String,
    key_pem: String,
    agents: AgentSet,
    transport: Mutex<Option<QuicTransport>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(bind: SocketAddr, cert_pem: String, key_pem: String) -> Self {
        Self {
            id: ControllerId::new(),
            bind,
            cert_pem,
            key_pem,
            agents: AgentSet::default(),
            transport: Mutex::new(None),
            accept_task: Mutex::new(None),
        }
    }

    /// The identity handed to every agent this manager subscribes to.
    pub fn id(&self) -> ControllerId {
        self.id
    }

    /// Address of the callback endpoint, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.current_transport()
            .and_then(|transport| transport.local_addr().ok())
    }

    /// Snapshot of the managed agents.
    pub fn agents(&self) -> Vec<AgentHandle> {
        self.agents.snapshot()
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind the callback endpoint so agents can reach this control center.
    pub fn start(&self) -> Result<(), NodeError> {
        let mut slot = lock(&self.transport);
        if slot.is_some() {
            return Err(NodeError::AlreadyRunning);
        }

        let transport = QuicTransport::bind(self.bind, &self.cert_pem, &self.key_pem)?;
        let task = spawn_accept_loop(transport.clone(), self.callback_service());
        *lock(&self.accept_task) = Some(task);
        *slot = Some(transport);

        info!(controller = %self.id, "callback service started");
        Ok(())
    }

    /// Subscribe to the agent at `host:port`.
    ///
    /// Returns `None` on any failure; the failure is logged, not retried.
    pub async fn connect(&self, host: &str, port: u16) -> Option<AgentHandle> {
        match self.try_connect(host, port).await {
            Ok(handle) => {
                info!(host, port, agent = %handle.agent(), "connection to agent established");
                Some(handle)
            }
            Err(e) => {
                warn!(host, port, error = %e, "failed to connect to agent");
                None
            }
        }
    }

    async fn try_connect(&self, host: &str, port: u16) -> Result<AgentHandle, NodeError> {
        let transport = self.current_transport().ok_or(NodeError::NotRunning)?;
        let address = QuicTransport::resolve(host, port).await?;
        let connection = transport.connect(address).await?;

        // The agent calls back over this connection when it shuts down.
        tokio::spawn(serve_connection(connection.clone(), self.callback_service()));

        let handle = match AgentHandle::lookup(connection.clone(), address).await {
            Ok(handle) => handle,
            Err(e) => {
                connection.close();
                return Err(e.into());
            }
        };

        // Insert before registering so an unsubscribe that arrives right
        // after the registration is acknowledged finds the entry.
        let previous = self.agents.insert(handle.clone());
        if let Err(e) = handle.register_callback(self.id).await {
            if !self.agents.restore(&handle, previous.clone()) {
                if let Some(previous) = &previous {
                    previous.close();
                }
            }
            connection.close();
            return Err(e.into());
        }

        // The agent went away between acknowledging and now.
        if !self.agents.holds(&handle) {
            if let Some(previous) = &previous {
                previous.close();
            }
            connection.close();
            return Err(NodeError::Unsubscribed(handle.agent().to_string()));
        }

        if let Some(previous) = previous {
            if !previous.same_connection(&handle) {
                debug!(agent = %handle.agent(), "closing superseded connection");
                previous.close();
            }
        }
        Ok(handle)
    }

    /// Unsubscribe from `agent` and forget it, even if the agent cannot be reached.
    ///
    /// The unregister goes over the connection currently stored for the
    /// agent, so a handle superseded by a later `connect` still works.
    pub async fn disconnect(&self, agent: &AgentHandle) {
        let current = self.agents.get(&agent.id());
        let target = current.as_ref().unwrap_or(agent);

        if target.is_closed() {
            debug!(agent = %target.agent(), "connection already closed, skipping unregister");
        } else if let Err(e) = target.unregister_callback(self.id).await {
            warn!(agent = %target.agent(), error = %e, "failed to unregister from agent");
        }

        self.agents.remove(&agent.id());
        target.close();
        if !agent.same_connection(target) {
            agent.close();
        }
        info!(agent = %agent.agent(), "connection to agent closed by control center");
    }

    /// Inbound: `agent` is shutting down. Never calls back into it.
    pub fn unsubscribe_agent(&self, agent: &AgentRef) {
        forget_agent(&self.agents, agent);
    }

    /// Disconnect every managed agent, then unbind the callback endpoint.
    pub async fn stop(&self) -> Result<(), NodeError> {
        let transport = lock(&self.transport)
            .take()
            .ok_or(NodeError::NotRunning)?;

        // disconnect() mutates the set, so iterate over a copy.
        for agent in self.agents.snapshot() {
            self.disconnect(&agent).await;
        }

        transport.close();
        let task = lock(&self.accept_task).take();
        if let Some(task) = task {
            let _ = task.await;
        }

        info!(controller = %self.id, "callback service stopped");
        Ok(())
    }

    fn current_transport(&self) -> Option<QuicTransport> {
        lock(&self.transport).clone()
    }

    fn callback_service(&self) -> Arc<dyn Service> {
        Arc::new(CallbackService {
            agents: self.agents.clone(),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn forget_agent(agents: &AgentSet, agent: &AgentRef) {
    if agents.remove(&agent.id).is_some() {
        info!(agent = %agent, "connection to agent closed by agent");
    } else {
        debug!(agent = %agent, "unsubscribe from agent that is not managed");
    }
}

/// Serves the controller-facing call.
struct CallbackService {
    agents: AgentSet,
}

#[async_trait]
impl Service for CallbackService {
    async fn handle(&self, request: Request, _connection: &PeerConnection) -> Response {
        match request {
            Request::UnsubscribeAgent { agent } => {
                forget_agent(&self.agents, &agent);
                Response::Ack
            }
            other => {
                warn!(call = other.kind(), "control center received an agent-only call");
                Response::Rejected {
                    reason: format!("{} is served by agents", other.kind()),
                }
            }
        }
    }
}
