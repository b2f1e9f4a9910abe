//! Transport layer for nrpc.
//!
//! nrpc runs over any ordered, reliable byte stream. This crate provides:
//! - The [`Duplex`] bound every peer connection must satisfy
//! - TCP bind/connect helpers with address-carrying errors
//! - Endpoint naming used to label peers in logs
//!
//! This is the lowest layer of nrpc. Everything else builds on top of it.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{bind, connect, endpoint_name, stream_name};
pub use traits::Duplex;
