use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nrpc_transport::stream_name;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::config::ClientOptions;
use crate::peer::{Peer, TransportEnd};

/// Reconnecting TCP client.
///
/// After [`RpcClient::connect`] the client keeps one connection to the
/// endpoint alive: whenever the transport fails or closes it reconnects
/// after a doubling backoff delay, until [`RpcClient::close`]. Each
/// connection whose handshake completes is handed out through
/// [`RpcClient::next_connection`].
pub struct RpcClient {
    options: ClientOptions,
    connections_tx: mpsc::UnboundedSender<Peer>,
    connections: mpsc::UnboundedReceiver<Peer>,
    session: Option<CancellationToken>,
    attempts: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(options: ClientOptions) -> Self {
        let (connections_tx, connections) = mpsc::unbounded_channel();
        Self {
            options,
            connections_tx,
            connections,
            session: None,
            attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start connecting to `addr` (`host:port`).
    ///
    /// Replaces any previous target and starts over from the initial
    /// backoff delay. Must be called from within a Tokio runtime.
    pub fn connect(&mut self, addr: impl Into<String>) {
        if let Some(previous) = self.session.take() {
            previous.cancel();
        }

        let closed = CancellationToken::new();
        self.session = Some(closed.clone());
        tokio::spawn(reconnect_loop(
            addr.into(),
            self.options.clone(),
            self.connections_tx.clone(),
            Arc::clone(&self.attempts),
            closed,
        ));
    }

    /// Stop reconnecting. The current connection, if any, is left open.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel();
        }
    }

    /// Wait for the next connection that completes its handshake.
    pub async fn next_connection(&mut self) -> Option<Peer> {
        self.connections.recv().await
    }

    /// Connection attempts made so far, across every `connect`.
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("connected", &self.session.is_some())
            .field("attempts", &self.connect_attempts())
            .finish_non_exhaustive()
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn reconnect_loop(
    addr: String,
    options: ClientOptions,
    connections: mpsc::UnboundedSender<Peer>,
    attempts: Arc<AtomicU64>,
    closed: CancellationToken,
) {
    let mut backoff = Backoff::new(options.initial_backoff, options.max_backoff);

    while !closed.is_cancelled() {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let connected = tokio::select! {
            connected = nrpc_transport::connect(&addr) => connected,
            _ = closed.cancelled() => break,
        };

        match connected {
            Ok(stream) => run_session(stream, &options, &connections, &mut backoff).await,
            Err(err) => tracing::warn!(%addr, attempt, error = %err, "connect failed"),
        }

        if closed.is_cancelled() {
            break;
        }
        let delay = backoff.next_delay();
        tracing::debug!(%addr, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = closed.cancelled() => break,
        }
    }
    tracing::debug!(%addr, "reconnect loop stopped");
}

/// Drive one connection until its transport ends.
async fn run_session(
    stream: TcpStream,
    options: &ClientOptions,
    connections: &mpsc::UnboundedSender<Peer>,
    backoff: &mut Backoff,
) {
    let name = stream_name(&stream);
    let peer = Peer::new(stream, options.endpoint.peer_options(name));
    tracing::debug!(peer = %peer.name(), "created rpc peer");
    if let Err(err) = peer.open() {
        tracing::error!(peer = %peer.name(), error = %err, "failed to open peer");
        return;
    }

    match peer.authenticated().await {
        Ok(()) => {
            tracing::debug!(peer = %peer.name(), "accepted by server peer");
            backoff.reset();
            if connections.send(peer.clone()).is_err() {
                peer.close();
            }
        }
        Err(err) => {
            tracing::warn!(peer = %peer.name(), error = %err, "handshake did not complete");
        }
    }

    match peer.transport_closed().await {
        TransportEnd::Error(err) => {
            tracing::error!(peer = %peer.name(), error = %err, "rpc peer closed with error");
        }
        _ => tracing::info!(peer = %peer.name(), "rpc peer closed"),
    }
}
