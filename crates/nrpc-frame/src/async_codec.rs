use bytes::BytesMut;
use tokio_util::codec::Encoder;

use crate::codec::{encode_frame, Frame, DEFAULT_MAX_PAYLOAD};
use crate::error::FrameError;

/// Outbound frame encoder for `tokio_util::codec::FramedWrite`.
///
/// Inbound bytes go through [`crate::FrameReassembler`] instead, so the
/// receive side keeps the chunk-by-chunk `feed` contract.
#[derive(Debug, Clone)]
pub struct RpcCodec {
    max_payload: usize,
}

impl RpcCodec {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Frame> for RpcCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: item.payload.len(),
                max: self.max_payload,
            });
        }
        encode_frame(item.code, item.payload.as_ref(), dst)
    }
}
