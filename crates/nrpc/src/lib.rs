//! Bidirectional, authenticated RPC over framed byte streams.
//!
//! Both ends of a connection are equal peers: each authenticates the other,
//! each can call services the other exposes.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP bind/connect helpers and the stream bound peers run over
//! - [`frame`]: Type-tagged, length-prefixed framing and chunk reassembly
//! - [`peer`]: Handshake, call correlation, servers and reconnecting clients (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use nrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use nrpc_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use nrpc_peer::*;
}
