//! Agent references exchanged over the wire.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::identity::AgentId;

/// Describes a running agent process.
///
/// Two references denote the same agent iff their [`AgentId`]s match; the
/// remaining fields are informational and may be stale.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct AgentRef {
    pub id: AgentId,
    /// Human-readable agent name.
    pub name: String,
    /// OS process id of the agent.
    pub pid: u32,
    /// Port the agent endpoint is bound to.
    pub port: u16,
}

impl PartialEq for AgentRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AgentRef {}

impl std::hash::Hash for AgentRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for AgentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (pid {}, port {})", self.name, self.pid, self.port)
    }
}
