//! Agent endpoint state machine.

/// Lifecycle state of an agent endpoint.
///
/// `Unbound -> Listening -> Subscribed -> Listening -> Unbound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Not reachable: before start or after stop.
    Unbound,
    /// Bound under the well-known name, no controller subscribed.
    Listening,
    /// Bound, with exactly one controller subscribed.
    Subscribed,
}

impl AgentState {
    /// Derive the state from the bound flag and the subscriber slot.
    pub fn from_parts(bound: bool, subscribed: bool) -> Self {
        match (bound, subscribed) {
            (false, _) => Self::Unbound,
            (true, false) => Self::Listening,
            (true, true) => Self::Subscribed,
        }
    }

    /// Whether the endpoint is reachable by controllers.
    pub fn is_bound(self) -> bool {
        self != Self::Unbound
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbound => write!(f, "Unbound"),
            Self::Listening => write!(f, "Listening"),
            Self::Subscribed => write!(f, "Subscribed"),
        }
    }
}
