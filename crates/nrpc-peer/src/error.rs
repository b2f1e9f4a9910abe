use crate::auth::{AuthError, AuthState};
use crate::message::Response;

/// Errors that can occur in peer operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] nrpc_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] nrpc_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The authenticator rejected the peer's credentials.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// A call was issued before the handshake reached `ACCEPT`.
    #[error("RPC state error({0})")]
    State(AuthState),

    /// The remote side answered with a non-`SUCCESS` code.
    #[error("{}: {}", .0.code, .0.errmsg.as_deref().unwrap_or("remote call failed"))]
    Remote(Response),

    /// No response arrived within the call timeout.
    #[error("RPC_TIMEOUT({0})")]
    Timeout(u32),

    /// The peer was closed or its transport ended while the call was outstanding.
    #[error("peer closed")]
    Closed,

    /// `open()` was called more than once.
    #[error("peer already opened")]
    AlreadyOpen,
}

impl PeerError {
    /// The remote result code, for `Remote` failures.
    pub fn code(&self) -> Option<&str> {
        match self {
            PeerError::Remote(resp) => Some(resp.code.as_str()),
            _ => None,
        }
    }

    /// The remote error message, for `Remote` failures.
    pub fn errmsg(&self) -> Option<&str> {
        match self {
            PeerError::Remote(resp) => resp.errmsg.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
