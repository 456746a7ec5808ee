//! Inbound call dispatch.
//!
//! Every accepted connection gets a reader task, and every call arriving on
//! it is handled on its own task, so a slow handler never blocks other
//! callers.

use std::sync::Arc;

use async_trait::async_trait;
use robocc_protocol::{MessageReceiver, MessageSender, PeerConnection, ProtocolError, QuicTransport};
use robocc_types::{Request, Response};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Handles calls arriving on an endpoint.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Answer one call. `connection` is the connection the call arrived on.
    async fn handle(&self, request: Request, connection: &PeerConnection) -> Response;
}

/// Accept connections on `transport` until it is closed, serving each with `service`.
pub fn spawn_accept_loop(transport: QuicTransport, service: Arc<dyn Service>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match transport.accept().await {
                Ok(Some(connection)) => {
                    tokio::spawn(serve_connection(connection, Arc::clone(&service)));
                }
                Ok(None) => {
                    debug!("endpoint closed, accept loop finished");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "incoming connection failed");
                }
            }
        }
    })
}

/// Serve calls opened by the peer of `connection` until it closes.
pub async fn serve_connection(connection: PeerConnection, service: Arc<dyn Service>) {
    let remote = connection.remote_address();
    loop {
        let (tx, rx) = match connection.accept_control_stream().await {
            Ok(streams) => streams,
            Err(e) => {
                debug!(remote = %remote, error = %e, "connection closed");
                break;
            }
        };

        let service = Arc::clone(&service);
        let connection = connection.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_call(service.as_ref(), &connection, tx, rx).await {
                debug!(remote = %remote, error = %e, "call failed");
            }
        });
    }
}

async fn handle_call(
    service: &dyn Service,
    connection: &PeerConnection,
    mut tx: MessageSender,
    mut rx: MessageReceiver,
) -> Result<(), ProtocolError> {
    let Some(request) = rx.recv::<Request>().await? else {
        return Ok(());
    };

    let kind = request.kind();
    trace!(call = kind, "dispatching call");
    let response = service.handle(request, connection).await;

    tx.send(&response).await?;
    tx.finish()
}

/// Turn anything but [`Response::Ack`] into an error.
pub(crate) fn expect_ack(response: Response) -> Result<(), ProtocolError> {
    match response {
        Response::Ack => Ok(()),
        Response::Rejected { reason } => Err(ProtocolError::Rejected(reason)),
        Response::NotBound { service } => Err(ProtocolError::NotBound(service)),
        other => Err(ProtocolError::UnexpectedResponse(format!("{other:?}"))),
    }
}
