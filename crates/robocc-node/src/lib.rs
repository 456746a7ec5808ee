//! Remote-control core for robocc.
//!
//! Implements the agent side (a single-subscriber endpoint bound under a
//! well-known name) and the control-center side (a connection manager that
//! owns the set of subscribed agents and serves their shutdown callbacks),
//! plus the configuration and setup glue around them.

pub mod agent;
pub mod callback;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod handle;
pub mod manager;
pub mod service;
pub mod setup;
pub mod state;

pub use agent::Agent;
pub use callback::{Callback, RemoteCallback};
pub use config::Config;
pub use endpoint::{AgentEndpoint, UnregisterOutcome};
pub use error::NodeError;
pub use handle::AgentHandle;
pub use manager::ConnectionManager;
pub use state::AgentState;
