//! Mutual authentication.
//!
//! Each side sends an `AUTH` frame with its own credentials as soon as the
//! connection opens, and answers the other side's `AUTH` with an
//! `AUTH_ACCEPT` verdict. The connection is usable once both directions have
//! been accepted, in whichever order the two verdicts arrive:
//!
//! ```text
//!            peer's AUTH verified              our AUTH accepted by peer
//! HANDSHAKE ─────────────────────▶ ACCEPT_PEER ─────────────────────────▶ ACCEPT
//!     │                                                                     ▲
//!     │ our AUTH accepted by peer                peer's AUTH verified       │
//!     └───────────────────────────▶ ACCEPT_BY_PEER ─────────────────────────┘
//! ```
//!
//! Any out-of-order verdict or failed verification moves to `REJECT`.

use std::fmt;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::AuthAccept;

/// Identity produced by an [`Authenticator`] once the peer's credentials check out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Application-defined user record.
    pub content: Value,
    /// Roles granted to the peer.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new(content: Value) -> Self {
        Self {
            content,
            roles: Vec::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

/// Reason an authenticator refused the peer's credentials.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct AuthError(pub String);

impl AuthError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Pluggable credential exchange.
///
/// `handshake` produces this side's credentials; `accept` verifies the other
/// side's. Verification may suspend on external I/O.
pub trait Authenticator: Send + Sync + 'static {
    /// Credentials sent in this side's `AUTH` frame.
    fn handshake(&self) -> Bytes;

    /// Verify the peer's `AUTH` payload.
    fn accept(&self, payload: Bytes) -> BoxFuture<'static, Result<Identity, AuthError>>;
}

/// Shared-secret authenticator: both sides send the same token.
#[derive(Clone)]
pub struct TokenAuthenticator {
    token: String,
    identity: Identity,
}

impl TokenAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            identity: Identity::new(Value::Null),
        }
    }

    /// Identity assigned to peers presenting the right token.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("token", &format_args!("<redacted:{} bytes>", self.token.len()))
            .field("identity", &self.identity)
            .finish()
    }
}

impl Authenticator for TokenAuthenticator {
    fn handshake(&self) -> Bytes {
        Bytes::copy_from_slice(self.token.as_bytes())
    }

    fn accept(&self, payload: Bytes) -> BoxFuture<'static, Result<Identity, AuthError>> {
        let verdict = if constant_time_eq(payload.as_ref(), self.token.as_bytes()) {
            Ok(self.identity.clone())
        } else {
            Err(AuthError::new("invalid token"))
        };
        Box::pin(async move { verdict })
    }
}

/// Accepts every peer with a fixed identity and sends empty credentials.
#[derive(Debug, Clone, Default)]
pub struct AnonymousAuthenticator {
    identity: Identity,
}

impl AnonymousAuthenticator {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }
}

impl Authenticator for AnonymousAuthenticator {
    fn handshake(&self) -> Bytes {
        Bytes::new()
    }

    fn accept(&self, _payload: Bytes) -> BoxFuture<'static, Result<Identity, AuthError>> {
        let identity = self.identity.clone();
        Box::pin(async move { Ok(identity) })
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Handshake state of one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Init,
    Handshake,
    Reject,
    /// The peer accepted our credentials; theirs are not verified yet.
    AcceptByPeer,
    /// We accepted the peer's credentials; waiting on their verdict.
    AcceptPeer,
    Accept,
}

impl AuthState {
    pub fn name(self) -> &'static str {
        match self {
            AuthState::Init => "INIT",
            AuthState::Handshake => "HANDSHAKE",
            AuthState::Reject => "REJECT",
            AuthState::AcceptByPeer => "ACCEPT_BY_PEER",
            AuthState::AcceptPeer => "ACCEPT_PEER",
            AuthState::Accept => "ACCEPT",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signal raised by a handshake transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Accept,
    Reject(String),
}

/// Outcome of one handshake transition: an optional `AUTH_ACCEPT` to send
/// back and an optional signal to raise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Step {
    pub reply: Option<AuthAccept>,
    pub signal: Option<Signal>,
}

/// The two-sided handshake state machine. Pure: no I/O, no clocks.
#[derive(Debug, Default)]
pub struct Handshake {
    state: AuthState,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn is_accepted(&self) -> bool {
        self.state == AuthState::Accept
    }

    /// Our `AUTH` frame has been queued.
    pub fn begin(&mut self) {
        self.state = AuthState::Handshake;
    }

    /// Screen an inbound `AUTH` before verification. A rejected handshake
    /// answers immediately without consulting the authenticator.
    pub fn screen(&self) -> Option<AuthAccept> {
        (self.state == AuthState::Reject)
            .then(|| AuthAccept::failed(format!("invalid peer status {}", AuthState::Reject)))
    }

    /// The authenticator accepted the peer's credentials.
    pub fn peer_verified(&mut self) -> Step {
        match self.state {
            AuthState::Init | AuthState::Handshake => {
                self.state = AuthState::AcceptPeer;
                Step {
                    reply: Some(AuthAccept::success()),
                    signal: None,
                }
            }
            AuthState::AcceptByPeer => {
                self.state = AuthState::Accept;
                Step {
                    reply: Some(AuthAccept::success()),
                    signal: Some(Signal::Accept),
                }
            }
            other => {
                let reason = format!("reject auth request by invalid status {other}");
                self.state = AuthState::Reject;
                Step {
                    reply: Some(AuthAccept::failed(reason.clone())),
                    signal: Some(Signal::Reject(reason)),
                }
            }
        }
    }

    /// The authenticator refused the peer's credentials.
    pub fn peer_verification_failed(&mut self, reason: &str) -> Step {
        self.state = AuthState::Reject;
        Step {
            reply: Some(AuthAccept::failed(reason)),
            signal: Some(Signal::Reject(reason.to_string())),
        }
    }

    /// The peer's verdict on our credentials arrived.
    pub fn peer_verdict(&mut self, verdict: &AuthAccept) -> Step {
        if !verdict.is_success() {
            self.state = AuthState::Reject;
            let reason = format!(
                "auth response({}): {}",
                verdict.code,
                verdict.errmsg.as_deref().unwrap_or("no reason given")
            );
            return Step {
                reply: None,
                signal: Some(Signal::Reject(reason)),
            };
        }

        match self.state {
            AuthState::Handshake => {
                self.state = AuthState::AcceptByPeer;
                Step::default()
            }
            AuthState::AcceptPeer => {
                self.state = AuthState::Accept;
                Step {
                    reply: None,
                    signal: Some(Signal::Accept),
                }
            }
            other => {
                self.state = AuthState::Reject;
                Step {
                    reply: None,
                    signal: Some(Signal::Reject(format!(
                        "invalid status {other}, dropping auth response"
                    ))),
                }
            }
        }
    }
}
