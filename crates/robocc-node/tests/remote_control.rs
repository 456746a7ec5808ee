//! Integration tests exercising agents and control centers on loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use robocc_node::service::{spawn_accept_loop, Service};
use robocc_node::{Agent, AgentState, ConnectionManager, NodeError};
use robocc_protocol::{PeerConnection, QuicTransport};
use robocc_types::{
    AgentId, AgentRef, ProtocolVersion, Request, Response, AGENT_SERVICE_NAME, PROTOCOL_VERSION,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn credentials() -> (String, String) {
    let cert = robocc_certgen::generate_certificate("localhost").unwrap();
    (cert.cert_pem, cert.key_pem)
}

fn started_agent(name: &str) -> Agent {
    let (cert_pem, key_pem) = credentials();
    let mut agent = Agent::new(loopback(), name, std::process::id(), cert_pem, key_pem);
    agent.start().unwrap();
    agent
}

fn started_manager() -> ConnectionManager {
    let (cert_pem, key_pem) = credentials();
    let manager = ConnectionManager::new(loopback(), cert_pem, key_pem);
    manager.start().unwrap();
    manager
}

fn port_of(agent: &Agent) -> u16 {
    agent.local_addr().expect("agent should be bound").port()
}

/// A bare QUIC client for poking endpoints with hand-written requests.
async fn raw_client(addr: SocketAddr) -> (QuicTransport, PeerConnection) {
    let (cert_pem, key_pem) = credentials();
    let transport = QuicTransport::bind(loopback(), &cert_pem, &key_pem).unwrap();
    let connection = transport.connect(addr).await.unwrap();
    (transport, connection)
}

#[tokio::test]
async fn connect_disconnect_reconnect() {
    init_tracing();
    let mut agent = started_agent("agent-a");
    let manager = started_manager();
    let port = port_of(&agent);
    assert_eq!(agent.endpoint().state(), AgentState::Listening);

    let handle = manager
        .connect("127.0.0.1", port)
        .await
        .expect("connect should succeed");
    assert_eq!(handle.id(), agent.agent_ref().id);
    assert_eq!(handle.agent().port, port);
    assert!(manager.contains(&handle.id()));
    assert_eq!(manager.len(), 1);
    assert_eq!(agent.endpoint().subscriber(), Some(manager.id()));
    assert_eq!(agent.endpoint().state(), AgentState::Subscribed);

    manager.disconnect(&handle).await;
    assert!(manager.is_empty());
    assert_eq!(agent.endpoint().subscriber(), None);
    assert_eq!(agent.endpoint().state(), AgentState::Listening);

    let again = manager
        .connect("127.0.0.1", port)
        .await
        .expect("reconnect should succeed");
    assert_eq!(again, handle);
    assert_eq!(manager.len(), 1);
    assert_eq!(agent.endpoint().subscriber(), Some(manager.id()));

    manager.stop().await.unwrap();
    agent.stop().await.unwrap();
}

#[tokio::test]
async fn agent_stop_notifies_controller_then_becomes_unreachable() {
    init_tracing();
    let mut agent = started_agent("agent-a");
    let manager = started_manager();
    let port = port_of(&agent);

    let handle = manager.connect("127.0.0.1", port).await.unwrap();
    assert!(manager.contains(&handle.id()));

    // stop() waits for the controller to acknowledge the notification.
    agent.stop().await.unwrap();
    assert!(manager.is_empty(), "controller should have dropped the agent");
    assert_eq!(agent.endpoint().state(), AgentState::Unbound);
    assert!(agent.local_addr().is_none());

    let reconnect = tokio::time::timeout(
        Duration::from_secs(15),
        manager.connect("127.0.0.1", port),
    )
    .await
    .expect("connect to a stopped agent should fail, not hang");
    assert!(reconnect.is_none());
    assert!(manager.is_empty());

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn second_controller_overwrites_first() {
    init_tracing();
    let mut agent = started_agent("agent-a");
    let first = started_manager();
    let second = started_manager();
    let port = port_of(&agent);

    let first_handle = first.connect("127.0.0.1", port).await.unwrap();
    assert!(second.connect("127.0.0.1", port).await.is_some());

    // Both registrations succeeded; the agent only remembers the last one.
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(agent.endpoint().subscriber(), Some(second.id()));

    // The overwritten controller cannot unsubscribe the current one.
    first.disconnect(&first_handle).await;
    assert!(first.is_empty());
    assert_eq!(agent.endpoint().subscriber(), Some(second.id()));

    // Only the current subscriber hears about the shutdown.
    agent.stop().await.unwrap();
    assert!(second.is_empty());

    first.stop().await.unwrap();
    second.stop().await.unwrap();
}

#[tokio::test]
async fn manager_stop_drains_set_despite_remote_failures() {
    init_tracing();
    let mut agent_a = started_agent("agent-a");
    let mut agent_b = started_agent("agent-b");
    let manager = started_manager();
    let other = started_manager();

    let handle_a = manager.connect("127.0.0.1", port_of(&agent_a)).await.unwrap();
    let handle_b = manager.connect("127.0.0.1", port_of(&agent_b)).await.unwrap();
    assert_eq!(manager.len(), 2);

    // Another controller takes over A; A's shutdown only reaches it, so
    // `manager` is left holding a handle to an agent that is gone.
    other.connect("127.0.0.1", port_of(&agent_a)).await.unwrap();
    agent_a.stop().await.unwrap();
    assert!(other.is_empty());
    assert!(manager.contains(&handle_a.id()));

    tokio::time::timeout(Duration::from_secs(30), manager.stop())
        .await
        .expect("stop should complete")
        .unwrap();
    assert!(manager.is_empty());
    assert!(!manager.contains(&handle_b.id()));
    assert_eq!(agent_b.endpoint().subscriber(), None);

    agent_b.stop().await.unwrap();
    other.stop().await.unwrap();
}

#[tokio::test]
async fn duplicate_connect_keeps_one_entry() {
    let mut agent = started_agent("agent-a");
    let manager = started_manager();
    let port = port_of(&agent);

    let first = manager.connect("127.0.0.1", port).await.unwrap();
    let second = manager.connect("127.0.0.1", port).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(manager.len(), 1);
    assert_eq!(manager.agents(), vec![second.clone()]);
    assert_eq!(agent.endpoint().subscriber(), Some(manager.id()));

    manager.disconnect(&second).await;
    assert!(manager.is_empty());
    assert_eq!(agent.endpoint().subscriber(), None);

    manager.stop().await.unwrap();
    agent.stop().await.unwrap();
}

#[tokio::test]
async fn agent_stop_without_subscriber() {
    let mut agent = started_agent("agent-a");
    assert_eq!(agent.endpoint().subscriber(), None);
    agent.stop().await.unwrap();
    assert_eq!(agent.endpoint().state(), AgentState::Unbound);
    assert!(matches!(agent.stop().await, Err(NodeError::NotRunning)));
}

#[tokio::test]
async fn agent_lifecycle_errors() {
    let mut agent = started_agent("agent-a");
    assert!(matches!(agent.start(), Err(NodeError::AlreadyRunning)));

    let taken = agent.local_addr().unwrap();
    let (cert_pem, key_pem) = credentials();
    let mut clash = Agent::new(taken, "agent-b", std::process::id(), cert_pem, key_pem);
    assert!(matches!(clash.start(), Err(NodeError::Protocol(_))));
    assert_eq!(clash.endpoint().state(), AgentState::Unbound);
    assert!(clash.local_addr().is_none());

    agent.stop().await.unwrap();
}

#[tokio::test]
async fn lookup_of_unknown_service_is_not_bound() {
    let mut agent = started_agent("agent-a");
    let (client, connection) = raw_client(agent.local_addr().unwrap()).await;

    let response = connection
        .call(&Request::Lookup {
            version: PROTOCOL_VERSION,
            service: "robocc.camera".to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(response, Response::NotBound { service } if service == "robocc.camera"));

    let incompatible = connection
        .call(&Request::Lookup {
            version: ProtocolVersion { major: 9, minor: 0 },
            service: AGENT_SERVICE_NAME.to_string(),
        })
        .await
        .unwrap();
    assert!(matches!(incompatible, Response::Rejected { .. }));

    connection.close();
    client.close();
    agent.stop().await.unwrap();
}

#[tokio::test]
async fn callback_endpoint_accepts_unsubscribe_from_new_connection() {
    let mut agent = started_agent("agent-a");
    let manager = started_manager();
    let handle = manager
        .connect("127.0.0.1", port_of(&agent))
        .await
        .unwrap();

    let (client, connection) = raw_client(manager.local_addr().unwrap()).await;
    let response = connection
        .call(&Request::UnsubscribeAgent {
            agent: handle.agent().clone(),
        })
        .await
        .unwrap();
    assert!(matches!(response, Response::Ack));
    assert!(manager.is_empty());

    connection.close();
    client.close();
    manager.stop().await.unwrap();
    agent.stop().await.unwrap();
}

#[tokio::test]
async fn disconnect_through_superseded_handle_unsubscribes() {
    init_tracing();
    let mut agent = started_agent("agent-a");
    let manager = started_manager();
    let port = port_of(&agent);

    let first = manager.connect("127.0.0.1", port).await.unwrap();
    let second = manager.connect("127.0.0.1", port).await.unwrap();
    assert_eq!(agent.endpoint().subscriber(), Some(manager.id()));

    // `first` rides on the connection the second connect closed.
    manager.disconnect(&first).await;
    assert!(manager.is_empty());
    assert!(!manager.contains(&second.id()));
    assert_eq!(agent.endpoint().subscriber(), None);
    assert_eq!(agent.endpoint().state(), AgentState::Listening);

    manager.stop().await.unwrap();
    agent.stop().await.unwrap();
}

#[tokio::test]
async fn disconnect_after_agent_unsubscribed() {
    init_tracing();
    let mut agent = started_agent("agent-a");
    let manager = started_manager();

    let handle = manager.connect("127.0.0.1", port_of(&agent)).await.unwrap();
    agent.stop().await.unwrap();
    assert!(manager.is_empty());

    tokio::time::timeout(Duration::from_secs(30), manager.disconnect(&handle))
        .await
        .expect("disconnect should complete");
    assert!(manager.is_empty());
    assert!(!manager.contains(&handle.id()));

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn local_unsubscribe_then_disconnect() {
    let mut agent = started_agent("agent-a");
    let manager = started_manager();

    let handle = manager.connect("127.0.0.1", port_of(&agent)).await.unwrap();
    manager.unsubscribe_agent(handle.agent());
    assert!(manager.is_empty());

    // The agent still holds the subscription until told otherwise.
    assert_eq!(agent.endpoint().subscriber(), Some(manager.id()));
    manager.disconnect(&handle).await;
    assert!(manager.is_empty());
    assert_eq!(agent.endpoint().subscriber(), None);

    manager.stop().await.unwrap();
    agent.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_disconnect_and_agent_stop() {
    init_tracing();
    let mut agent = started_agent("agent-a");
    let manager = started_manager();

    let handle = manager.connect("127.0.0.1", port_of(&agent)).await.unwrap();

    let (_, stopped) = tokio::time::timeout(
        Duration::from_secs(30),
        async { tokio::join!(manager.disconnect(&handle), agent.stop()) },
    )
    .await
    .expect("both sides should finish");
    stopped.unwrap();

    assert!(manager.is_empty());
    assert_eq!(agent.endpoint().state(), AgentState::Unbound);
    assert_eq!(agent.endpoint().subscriber(), None);

    manager.stop().await.unwrap();
}

/// Answers lookups, then unsubscribes itself before acknowledging a registration.
struct VanishingAgent {
    agent: AgentRef,
}

#[async_trait]
impl Service for VanishingAgent {
    async fn handle(&self, request: Request, connection: &PeerConnection) -> Response {
        match request {
            Request::Lookup { .. } => Response::Bound {
                version: PROTOCOL_VERSION,
                agent: self.agent.clone(),
            },
            Request::RegisterCallback { .. } => {
                let _ = connection
                    .call(&Request::UnsubscribeAgent {
                        agent: self.agent.clone(),
                    })
                    .await;
                Response::Ack
            }
            _ => Response::Ack,
        }
    }
}

#[tokio::test]
async fn unsubscribe_during_connect_leaves_set_empty() {
    init_tracing();
    let (cert_pem, key_pem) = credentials();
    let transport = QuicTransport::bind(loopback(), &cert_pem, &key_pem).unwrap();
    let port = transport.local_addr().unwrap().port();
    let service = Arc::new(VanishingAgent {
        agent: AgentRef {
            id: AgentId::new(),
            name: "vanishing".to_string(),
            pid: std::process::id(),
            port,
        },
    });
    let accept = spawn_accept_loop(transport.clone(), service);

    let manager = started_manager();
    assert!(manager.connect("127.0.0.1", port).await.is_none());
    assert!(manager.is_empty());

    manager.stop().await.unwrap();
    transport.close();
    accept.await.unwrap();
}
