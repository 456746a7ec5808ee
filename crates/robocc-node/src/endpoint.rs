//! Agent endpoint: tracks the single subscribed controller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use robocc_types::{AgentId, AgentRef, ControllerId, AGENT_SERVICE_NAME};
use tracing::{info, warn};

use crate::callback::Callback;
use crate::error::NodeError;
use crate::state::AgentState;

/// Result of an unregister request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    /// The caller was the subscriber and has been removed.
    Disconnected,
    /// Another controller is subscribed; nothing changed.
    WrongController,
    /// Nobody is subscribed; nothing changed.
    NotConnected,
}

/// The agent-side endpoint.
///
/// Holds at most one subscriber. A second `register_callback` replaces the
/// first without telling it, and an unregister only takes effect when it
/// comes from the stored subscriber.
pub struct AgentEndpoint {
    id: AgentId,
    name: String,
    pid: u32,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Bound port; `None` while unbound.
    port: Option<u16>,
    subscriber: Option<Arc<dyn Callback>>,
}

impl AgentEndpoint {
    /// Create an unbound endpoint with a fresh identity.
    pub fn new(name: impl Into<String>, pid: u32) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            pid,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Describe this agent; the port is 0 while unbound.
    pub fn agent_ref(&self) -> AgentRef {
        AgentRef {
            id: self.id,
            name: self.name.clone(),
            pid: self.pid,
            port: self.lock().port.unwrap_or(0),
        }
    }

    pub fn state(&self) -> AgentState {
        let inner = self.lock();
        AgentState::from_parts(inner.port.is_some(), inner.subscriber.is_some())
    }

    /// The currently subscribed controller, if any.
    pub fn subscriber(&self) -> Option<ControllerId> {
        self.lock()
            .subscriber
            .as_ref()
            .map(|callback| callback.controller_id())
    }

    /// The current subscriber's callback, for notifying it.
    pub fn current_callback(&self) -> Option<Arc<dyn Callback>> {
        self.lock().subscriber.clone()
    }

    /// Resolve a service name; only the agent service is bound, and only while listening.
    pub fn lookup(&self, service: &str) -> Option<AgentRef> {
        if service != AGENT_SERVICE_NAME || !self.state().is_bound() {
            return None;
        }
        Some(self.agent_ref())
    }

    /// `Unbound -> Listening`, once the listener is up on `port`.
    pub fn bind(&self, port: u16) -> Result<(), NodeError> {
        let mut inner = self.lock();
        if inner.port.is_some() {
            return Err(NodeError::AlreadyRunning);
        }
        inner.port = Some(port);
        Ok(())
    }

    /// Make `callback` the subscriber, returning the controller it replaced.
    ///
    /// Overwriting a different controller is allowed; it is only logged.
    pub fn register_callback(
        &self,
        callback: Arc<dyn Callback>,
    ) -> Result<Option<ControllerId>, NodeError> {
        let controller = callback.controller_id();
        let mut inner = self.lock();
        if inner.port.is_none() {
            warn!(controller = %controller, "controller tried to connect while agent is unbound");
            return Err(NodeError::NotRunning);
        }

        let previous = inner
            .subscriber
            .replace(callback)
            .map(|old| old.controller_id());
        drop(inner);

        match previous {
            Some(old) if old != controller => {
                warn!(previous = %old, controller = %controller, "replacing subscribed controller");
            }
            _ => info!(controller = %controller, "controller connected"),
        }
        Ok(previous)
    }

    /// Remove `controller` if, and only if, it is the stored subscriber.
    pub fn unregister_callback(&self, controller: ControllerId) -> UnregisterOutcome {
        let mut inner = self.lock();
        let outcome = match inner.subscriber.as_ref().map(|cb| cb.controller_id()) {
            Some(current) if current == controller => {
                inner.subscriber = None;
                UnregisterOutcome::Disconnected
            }
            Some(_) => UnregisterOutcome::WrongController,
            None => UnregisterOutcome::NotConnected,
        };
        drop(inner);

        match outcome {
            UnregisterOutcome::Disconnected => info!(controller = %controller, "controller disconnected"),
            UnregisterOutcome::WrongController => {
                warn!(controller = %controller, "wrong controller tried to disconnect");
            }
            UnregisterOutcome::NotConnected => {
                warn!(controller = %controller, "controller tried to disconnect while not connected");
            }
        }
        outcome
    }

    /// `* -> Unbound`. Returns the subscriber that was still stored, if any.
    pub fn unbind(&self) -> Option<Arc<dyn Callback>> {
        let mut inner = self.lock();
        inner.port = None;
        inner.subscriber.take()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
