//! Type-tagged length-prefixed framing for nrpc.
//!
//! Every message is framed with:
//! - A 2-byte big-endian type code (`REQ`, `RESP`, `AUTH`, `AUTH_ACCEPT`)
//! - A 4-byte big-endian body length
//!
//! followed by exactly `length` body bytes. [`FrameReassembler`] handles
//! partial reads, so callers only ever see complete frames.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod reassembler;

#[cfg(feature = "async")]
pub use async_codec::RpcCodec;
pub use codec::{
    decode_frame, encode_frame, Frame, FrameType, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    RESERVED_AUTH_REJECT,
};
pub use error::{FrameError, Result};
pub use reassembler::FrameReassembler;
