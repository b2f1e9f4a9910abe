//! Authenticated, bidirectional RPC peers.
//!
//! This is the "just works" layer. Wrap any byte stream in a [`Peer`], run
//! the mutual handshake, then call the remote side's services and serve your
//! own. [`RpcServer`] and [`RpcClient`] take care of TCP connections, with
//! the client reconnecting on failure.

pub mod auth;
pub mod backoff;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod peer;
pub mod pending;
pub mod server;

pub use auth::{
    AnonymousAuthenticator, AuthError, AuthState, Authenticator, Handshake, Identity,
    TokenAuthenticator,
};
pub use backoff::Backoff;
pub use client::RpcClient;
pub use config::{
    ClientOptions, EndpointOptions, PeerConfig, PeerOptions, ServerOptions, DEFAULT_CALL_TIMEOUT,
    DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF,
};
pub use dispatch::{
    fail, handler, values, Dispatcher, Invocation, ResultStream, Service, ServiceError,
    ServiceRegistry,
};
pub use error::{PeerError, Result};
pub use message::{
    AuthAccept, Request, Response, AUTH_FAILED, RESOURCE_NOT_FOUND, RPC_ERROR, SUCCESS,
};
pub use peer::{Peer, PeerEvent, TransportEnd};
pub use pending::PendingReply;
pub use server::RpcServer;
