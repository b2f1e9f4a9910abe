use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use nrpc_transport::{endpoint_name, TransportError};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ServerOptions;
use crate::error::Result;
use crate::peer::{Peer, TransportEnd};

const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Accepts TCP connections and runs a [`Peer`] on each.
///
/// A peer is handed out through [`RpcServer::next_connection`] once its
/// handshake has completed, never before. Connections whose handshake fails
/// are left to the remote side to close.
pub struct RpcServer {
    local_addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<Peer>,
    shutdown: CancellationToken,
}

impl RpcServer {
    /// Bind a listener and start accepting.
    pub async fn bind<A>(addr: A, options: ServerOptions) -> Result<Self>
    where
        A: ToSocketAddrs + fmt::Debug,
    {
        let listener = nrpc_transport::bind(addr).await?;
        Self::from_listener(listener, options)
    }

    /// Start accepting on an already-bound listener.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_listener(listener: TcpListener, options: ServerOptions) -> Result<Self> {
        let local_addr = listener.local_addr().map_err(TransportError::from)?;
        let (connections_tx, connections) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tracing::info!(%local_addr, "rpc server listening");
        tokio::spawn(accept_loop(
            listener,
            options,
            connections_tx,
            shutdown.clone(),
        ));

        Ok(Self {
            local_addr,
            connections,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next peer that completed the handshake. `None` once the server is closed.
    pub async fn next_connection(&mut self) -> Option<Peer> {
        self.connections.recv().await
    }

    /// Stop accepting. Pending handshakes are dropped; established peers
    /// stay open.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    options: ServerOptions,
    connections: mpsc::UnboundedSender<Peer>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.cancelled() => break,
        };

        let (stream, remote) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::error!(error = %TransportError::Accept(err), "accept failed");
                tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                continue;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(%remote, error = %err, "failed to set TCP_NODELAY");
        }
        let name = endpoint_name(stream.local_addr().ok(), Some(remote));
        let peer = Peer::new(stream, options.endpoint.peer_options(name));
        tracing::debug!(peer = %peer.name(), "created rpc peer");

        if let Err(err) = peer.open() {
            tracing::error!(peer = %peer.name(), error = %err, "failed to open peer");
            continue;
        }
        tokio::spawn(supervise(peer, connections.clone(), shutdown.clone()));
    }
    tracing::debug!("accept loop stopped");
}

async fn supervise(
    peer: Peer,
    connections: mpsc::UnboundedSender<Peer>,
    shutdown: CancellationToken,
) {
    let accepted = tokio::select! {
        accepted = peer.authenticated() => accepted,
        _ = shutdown.cancelled() => {
            peer.close();
            return;
        }
    };

    if let Err(err) = accepted {
        tracing::debug!(peer = %peer.name(), error = %err, "handshake did not complete");
        // Abandoned: the remote side decides when the stream goes away.
        tokio::select! {
            _ = peer.transport_closed() => {}
            _ = shutdown.cancelled() => peer.close(),
        }
        return;
    }

    tracing::debug!(peer = %peer.name(), "accepted by client peer");
    if connections.send(peer.clone()).is_err() {
        tracing::debug!(peer = %peer.name(), "server dropped, closing peer");
        peer.close();
        return;
    }

    match peer.transport_closed().await {
        TransportEnd::Error(err) => {
            tracing::error!(peer = %peer.name(), error = %err, "rpc peer closed with error");
        }
        _ => tracing::info!(peer = %peer.name(), "rpc peer closed"),
    }
}
