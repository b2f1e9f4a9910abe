use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::SinkExt;
use nrpc_frame::{Frame, FrameError, FrameReassembler, FrameType, RpcCodec};
use nrpc_transport::Duplex;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthError, AuthState, Authenticator, Handshake, Identity, Signal};
use crate::config::{PeerConfig, PeerOptions};
use crate::dispatch::{serve, Dispatcher, Invocation, Service, ServiceRegistry};
use crate::error::{PeerError, Result};
use crate::message::{AuthAccept, Request, Response, AUTH_FAILED, RPC_ERROR};
use crate::pending::{PendingCalls, PendingReply};

const EVENT_CAPACITY: usize = 16;
const READ_BUFFER_CAPACITY: usize = 8 * 1024;
const NOT_AUTHENTICATED_MESSAGE: &str = "peer not authenticated";
const RESPONSE_TOO_LARGE_MESSAGE: &str = "response too large";

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Notifications raised by a [`Peer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Both directions of the handshake were accepted.
    Accepted,
    /// The handshake was rejected, locally or by the remote side.
    Rejected(String),
    /// The transport failed.
    Error(String),
    /// The transport ended. Raised once per peer.
    Closed { had_error: bool },
}

/// How a peer's transport ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEnd {
    /// The remote side closed the stream.
    Eof,
    /// Closed locally through [`Peer::close`].
    Local,
    /// Read or write failure.
    Error(String),
}

impl TransportEnd {
    pub fn is_error(&self) -> bool {
        matches!(self, TransportEnd::Error(_))
    }
}

struct Session {
    handshake: Handshake,
    next_id: u32,
    pending: PendingCalls,
    identity: Option<Identity>,
}

struct Io {
    reader: BoxReader,
    writer: BoxWriter,
    outbound: mpsc::UnboundedReceiver<Frame>,
}

struct Inner {
    name: String,
    config: PeerConfig,
    authenticator: Arc<dyn Authenticator>,
    dispatcher: Arc<dyn Dispatcher>,
    /// Services bound through [`Peer::accept`], never shared with other peers.
    services: ServiceRegistry,
    session: Mutex<Session>,
    outbound: mpsc::UnboundedSender<Frame>,
    io: Mutex<Option<Io>>,
    events: broadcast::Sender<PeerEvent>,
    shutdown: CancellationToken,
    transport_end: watch::Sender<Option<TransportEnd>>,
}

/// One end of an authenticated, bidirectional RPC connection.
///
/// A peer both issues calls to the remote side and serves the remote side's
/// calls, first from services bound with [`Peer::accept`] and then from the
/// configured dispatcher. Calls are only allowed once the mutual
/// handshake has reached `ACCEPT`. Cloning yields another handle to the same
/// connection.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<Inner>,
}

impl Peer {
    /// Wrap a connected stream. Nothing is sent until [`Peer::open`].
    pub fn new<S: Duplex>(stream: S, options: PeerOptions) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (transport_end, _) = watch::channel(None);

        Self {
            inner: Arc::new(Inner {
                name: options.name,
                config: options.config,
                authenticator: options.authenticator,
                dispatcher: options.dispatcher,
                services: ServiceRegistry::new(),
                session: Mutex::new(Session {
                    handshake: Handshake::new(),
                    next_id: 0,
                    pending: PendingCalls::new(),
                    identity: None,
                }),
                outbound,
                io: Mutex::new(Some(Io {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    outbound: outbound_rx,
                })),
                events,
                shutdown: CancellationToken::new(),
                transport_end,
            }),
        }
    }

    /// Send this side's credentials and start the I/O and timeout tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(&self) -> Result<()> {
        let io = lock(&self.inner.io).take().ok_or(PeerError::AlreadyOpen)?;

        {
            let mut session = self.inner.lock_session();
            let credentials = self.inner.authenticator.handshake();
            self.inner.send(Frame::new(FrameType::Auth, credentials))?;
            session.handshake.begin();
        }
        tracing::trace!(peer = %self.inner.name, "start handshake");

        tokio::spawn(write_loop(Arc::clone(&self.inner), io.writer, io.outbound));
        tokio::spawn(read_loop(Arc::clone(&self.inner), io.reader));
        tokio::spawn(sweep_loop(Arc::clone(&self.inner)));
        Ok(())
    }

    /// Stop the peer. Outstanding calls fail with [`PeerError::Closed`];
    /// frames already queued are flushed before the stream is shut down.
    pub fn close(&self) {
        // An unopened peer has no tasks; dropping the halves closes the stream.
        drop(lock(&self.inner.io).take());
        self.inner.finish(TransportEnd::Local);
    }

    /// Call `name` on the remote side.
    ///
    /// Fails immediately, without sending anything, unless the handshake has
    /// reached `ACCEPT`. A null `params` is sent as `{}`.
    pub fn call(&self, name: &str, params: Value) -> Result<PendingReply> {
        let params = match params {
            Value::Null => Value::Object(serde_json::Map::new()),
            params => params,
        };

        let mut session = self.inner.lock_session();
        let state = session.handshake.state();
        if state != AuthState::Accept {
            return Err(PeerError::State(state));
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(PeerError::Closed);
        }

        let id = session.next_id;
        let body = serde_json::to_vec(&Request {
            id,
            name: name.to_string(),
            params,
        })?;
        if body.len() > self.inner.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: body.len(),
                max: self.inner.config.max_payload_size,
            }
            .into());
        }

        session.next_id = session.next_id.wrapping_add(1);
        let reply = session.pending.register(id);
        if let Err(err) = self.inner.send(Frame::new(FrameType::Req, body)) {
            session.pending.forget(id);
            return Err(err);
        }
        tracing::trace!(peer = %self.inner.name, id, method = name, "call");
        Ok(reply)
    }

    /// Bind a service that the remote side of this connection may call.
    ///
    /// The binding is private to this peer and shadows a service of the same
    /// name in the configured dispatcher.
    pub fn accept(&self, name: &str, service: impl Service) -> &Self {
        self.inner.services.bind(name, Arc::new(service));
        self
    }

    /// The remote side's identity, once the handshake has completed.
    pub fn identity(&self) -> Option<Identity> {
        let session = self.inner.lock_session();
        if session.handshake.is_accepted() {
            session.identity.clone()
        } else {
            None
        }
    }

    /// The remote side's user record, once the handshake has completed.
    pub fn user(&self) -> Option<Value> {
        self.identity().map(|identity| identity.content)
    }

    pub fn state(&self) -> AuthState {
        self.inner.lock_session().handshake.state()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of calls waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_session().pending.len()
    }

    /// Subscribe to events raised after this point.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until the handshake reaches `ACCEPT`.
    ///
    /// Fails with [`PeerError::Auth`] on rejection and [`PeerError::Closed`]
    /// if the transport ends first.
    pub async fn authenticated(&self) -> Result<()> {
        let mut events = self.subscribe();
        loop {
            match self.state() {
                AuthState::Accept => return Ok(()),
                AuthState::Reject => return Err(AuthError::new("handshake rejected").into()),
                _ => {}
            }
            if self.transport_end().is_some() {
                return Err(PeerError::Closed);
            }

            match events.recv().await {
                Ok(PeerEvent::Accepted) => return Ok(()),
                Ok(PeerEvent::Rejected(reason)) => return Err(AuthError::new(reason).into()),
                Ok(PeerEvent::Closed { .. }) => return Err(PeerError::Closed),
                Ok(PeerEvent::Error(_)) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Err(PeerError::Closed),
            }
        }
    }

    /// How the transport ended, if it has.
    pub fn transport_end(&self) -> Option<TransportEnd> {
        self.inner.transport_end.borrow().clone()
    }

    /// Wait for the transport to end.
    pub async fn transport_closed(&self) -> TransportEnd {
        let mut rx = self.inner.transport_end.subscribe();
        let end = match rx.wait_for(Option::is_some).await {
            Ok(end) => (*end).clone().unwrap_or(TransportEnd::Local),
            Err(_) => TransportEnd::Local,
        };
        end
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock_session(&self) -> MutexGuard<'_, Session> {
        lock(&self.session)
    }

    fn send(&self, frame: Frame) -> Result<()> {
        self.outbound.send(frame).map_err(|_| PeerError::Closed)
    }

    fn send_json<T: Serialize>(&self, frame_type: FrameType, body: &T) -> Result<()> {
        let body = serde_json::to_vec(body)?;
        self.send(Frame::new(frame_type, body))
    }

    /// Send a `RESP`, replacing one that would not fit in a frame with an
    /// `RPC_ERROR` so the caller is not left waiting for its timeout.
    fn send_response(&self, response: &Response) -> Result<()> {
        let body = serde_json::to_vec(response)?;
        if body.len() <= self.config.max_payload_size {
            return self.send(Frame::new(FrameType::Resp, body));
        }

        tracing::warn!(
            peer = %self.name,
            id = response.id,
            size = body.len(),
            max = self.config.max_payload_size,
            "response exceeds payload limit"
        );
        self.send_json(
            FrameType::Resp,
            &Response::failure(response.id, RPC_ERROR, RESPONSE_TOO_LARGE_MESSAGE),
        )
    }

    /// Record the end of the transport. Only the first call has any effect.
    fn finish(&self, end: TransportEnd) {
        let first = self.transport_end.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(end.clone());
            true
        });
        if !first {
            return;
        }

        self.shutdown.cancel();
        let failed = self.lock_session().pending.close_all();

        match &end {
            TransportEnd::Error(err) => {
                tracing::warn!(peer = %self.name, error = %err, failed, "transport error");
                let _ = self.events.send(PeerEvent::Error(err.clone()));
            }
            _ => tracing::debug!(peer = %self.name, ?end, failed, "transport closed"),
        }
        let _ = self.events.send(PeerEvent::Closed {
            had_error: end.is_error(),
        });
    }

    fn raise(&self, signal: Option<Signal>) {
        match signal {
            Some(Signal::Accept) => {
                tracing::debug!(peer = %self.name, "handshake accepted");
                let _ = self.events.send(PeerEvent::Accepted);
            }
            Some(Signal::Reject(reason)) => {
                tracing::error!(peer = %self.name, %reason, "handshake rejected");
                let _ = self.events.send(PeerEvent::Rejected(reason));
            }
            None => {}
        }
    }

    /// Protocol errors stop at this boundary; the connection stays up.
    async fn handle_frame(self: &Arc<Self>, frame: Frame) {
        let code = frame.code;
        if let Err(err) = self.dispatch_frame(frame).await {
            tracing::error!(peer = %self.name, code, error = %err, "failed to handle frame");
        }
    }

    async fn dispatch_frame(self: &Arc<Self>, frame: Frame) -> Result<()> {
        let frame_type = frame.frame_type()?;
        tracing::trace!(
            peer = %self.name,
            frame_type = %frame_type,
            size = frame.payload.len(),
            "recv frame"
        );

        match frame_type {
            FrameType::Req => self.on_request(serde_json::from_slice(&frame.payload)?),
            FrameType::Resp => self.on_response(serde_json::from_slice(&frame.payload)?),
            FrameType::Auth => self.on_auth(frame.payload).await,
            FrameType::AuthAccept => self.on_auth_accept(serde_json::from_slice(&frame.payload)?),
        }
    }

    fn on_request(self: &Arc<Self>, request: Request) -> Result<()> {
        let identity = {
            let session = self.lock_session();
            if !session.handshake.is_accepted() {
                tracing::warn!(
                    peer = %self.name,
                    id = request.id,
                    state = %session.handshake.state(),
                    "call before handshake completed"
                );
                return self.send_json(
                    FrameType::Resp,
                    &Response::failure(request.id, AUTH_FAILED, NOT_AUTHENTICATED_MESSAGE),
                );
            }
            session.identity.clone()
        };

        tracing::trace!(peer = %self.name, id = request.id, method = %request.name, "recv call");
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let invocation = Invocation {
                name: request.name,
                params: request.params,
                identity,
            };
            let dispatcher: &dyn Dispatcher = if inner.services.contains(&invocation.name) {
                &inner.services
            } else {
                inner.dispatcher.as_ref()
            };
            let response = serve(dispatcher, request.id, invocation).await;
            if let Err(err) = inner.send_response(&response) {
                tracing::debug!(peer = %inner.name, id = request.id, error = %err, "response dropped");
            }
        });
        Ok(())
    }

    fn on_response(&self, response: Response) -> Result<()> {
        let id = response.id;
        let result = if response.is_success() {
            Ok(response.data.unwrap_or(Value::Null))
        } else {
            Err(PeerError::Remote(response))
        };

        if !self.lock_session().pending.complete(id, result) {
            tracing::warn!(peer = %self.name, id, "no pending call for response");
        }
        Ok(())
    }

    async fn on_auth(&self, payload: Bytes) -> Result<()> {
        let screened = self.lock_session().handshake.screen();
        if let Some(reply) = screened {
            return self.send_json(FrameType::AuthAccept, &reply);
        }

        let verdict = self.authenticator.accept(payload).await;

        let signal = {
            let mut session = self.lock_session();
            let step = match verdict {
                Ok(identity) => {
                    let step = session.handshake.peer_verified();
                    if matches!(
                        session.handshake.state(),
                        AuthState::AcceptPeer | AuthState::Accept
                    ) {
                        session.identity = Some(identity);
                    }
                    step
                }
                Err(err) => session.handshake.peer_verification_failed(&err.to_string()),
            };
            // The remote side must see our verdict before anything we send
            // as a result of accepting.
            if let Some(reply) = &step.reply {
                self.send_json(FrameType::AuthAccept, reply)?;
            }
            step.signal
        };
        self.raise(signal);
        Ok(())
    }

    fn on_auth_accept(&self, verdict: AuthAccept) -> Result<()> {
        let step = self.lock_session().handshake.peer_verdict(&verdict);
        self.raise(step.signal);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn write_loop(
    inner: Arc<Inner>,
    writer: BoxWriter,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
) {
    let mut sink = FramedWrite::new(
        writer,
        RpcCodec::with_max_payload(inner.config.max_payload_size),
    );

    loop {
        let frame = tokio::select! {
            frame = outbound.recv() => frame,
            _ = inner.shutdown.cancelled() => break,
        };
        let Some(frame) = frame else { break };

        match sink.send(frame).await {
            Ok(()) => {}
            Err(FrameError::Io(err)) => {
                inner.finish(TransportEnd::Error(err.to_string()));
                return;
            }
            Err(err) => tracing::error!(peer = %inner.name, error = %err, "dropping outbound frame"),
        }
    }

    while let Ok(frame) = outbound.try_recv() {
        if let Err(err) = sink.feed(frame).await {
            tracing::debug!(peer = %inner.name, error = %err, "discarding queued frames");
            break;
        }
    }
    if let Err(err) = sink.close().await {
        tracing::debug!(peer = %inner.name, error = %err, "stream shutdown failed");
    }
}

async fn read_loop(inner: Arc<Inner>, mut reader: BoxReader) {
    let mut reassembler = FrameReassembler::with_max_payload(inner.config.max_payload_size);
    let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
    let mut frames = Vec::new();

    let end = loop {
        buf.clear();
        let read = tokio::select! {
            read = reader.read_buf(&mut buf) => read,
            _ = inner.shutdown.cancelled() => break TransportEnd::Local,
        };

        match read {
            Ok(0) => break TransportEnd::Eof,
            Ok(_) => {
                if let Err(err) = reassembler.feed(&buf, |frame| frames.push(frame)) {
                    // An oversized header leaves the stream out of sync.
                    break TransportEnd::Error(err.to_string());
                }
                for frame in frames.drain(..) {
                    inner.handle_frame(frame).await;
                }
            }
            Err(err) => break TransportEnd::Error(err.to_string()),
        }
    };

    inner.finish(end);
}

async fn sweep_loop(inner: Arc<Inner>) {
    let timeout = inner.config.call_timeout;
    let period = timeout.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = inner.shutdown.cancelled() => break,
        }

        let expired = inner.lock_session().pending.sweep(Instant::now(), timeout);
        for id in expired {
            tracing::debug!(peer = %inner.name, id, "call timed out");
        }
    }
}
