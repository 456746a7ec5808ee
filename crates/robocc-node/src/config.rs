//! Node configuration loaded from TOML.

use std::net::SocketAddr;

use robocc_types::DEFAULT_PORT;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Settings shared by agents and control centers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Node identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
        }
    }
}

/// Where an agent listens for control centers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl AgentConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, NodeError> {
        socket_addr(&self.bind, self.port)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Control-center endpoint settings and statically known agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port of the callback endpoint; 0 picks an ephemeral port.
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

impl ControllerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, NodeError> {
        socket_addr(&self.bind, self.port)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: 0,
            agents: Vec::new(),
        }
    }
}

/// An agent the control center connects to on start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    #[serde(default)]
    pub name: Option<String>,
    /// `host` or `host:port`; the port defaults to 1976.
    pub address: String,
}

impl AgentEntry {
    pub fn host_port(&self) -> Result<(String, u16), NodeError> {
        parse_agent_address(&self.address)
    }
}

/// Split `host[:port]` into its parts, defaulting the port to [`DEFAULT_PORT`].
///
/// IPv6 literals must be bracketed when a port is given (`[::1]:1976`).
pub fn parse_agent_address(address: &str) -> Result<(String, u16), NodeError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(NodeError::Config("empty agent address".to_string()));
    }

    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| NodeError::Config(format!("unterminated IPv6 literal: {address}")))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port, address)?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return Err(NodeError::Config(format!("invalid agent address: {address}"))),
        };
        return Ok((host.to_string(), port));
    }

    match address.rsplit_once(':') {
        // More than one colon without brackets: a bare IPv6 address.
        Some((host, _)) if host.contains(':') => Ok((address.to_string(), DEFAULT_PORT)),
        Some((host, port)) => Ok((host.to_string(), parse_port(port, address)?)),
        None => Ok((address.to_string(), DEFAULT_PORT)),
    }
}

fn parse_port(port: &str, address: &str) -> Result<u16, NodeError> {
    port.parse()
        .map_err(|e| NodeError::Config(format!("invalid port in {address}: {e}")))
}

fn socket_addr(bind: &str, port: u16) -> Result<SocketAddr, NodeError> {
    let ip: std::net::IpAddr = bind
        .parse()
        .map_err(|e| NodeError::Config(format!("invalid bind address {bind}: {e}")))?;
    Ok(SocketAddr::new(ip, port))
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "robocc".to_string())
}
