use bytes::BytesMut;

use crate::codec::{decode_frame, Frame, DEFAULT_MAX_PAYLOAD};
use crate::error::Result;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Turns transport-delivered chunks into complete frames.
///
/// Chunks may split headers and bodies at any byte boundary. Partial data
/// stays buffered until the rest arrives; no frame is delivered partially and
/// buffered bytes are never dropped.
#[derive(Debug)]
pub struct FrameReassembler {
    buf: BytesMut,
    max_payload: usize,
}

impl FrameReassembler {
    /// Create a reassembler with the default payload limit.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create a reassembler with an explicit payload limit.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload,
        }
    }

    /// Append a chunk and hand every complete frame to `on_frame`, in arrival order.
    ///
    /// Returns the number of frames delivered. A `PayloadTooLarge` error means
    /// the stream can no longer be trusted to be in sync.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_frame: F) -> Result<usize>
    where
        F: FnMut(Frame),
    {
        self.buf.extend_from_slice(chunk);

        let mut delivered = 0usize;
        while let Some(frame) = decode_frame(&mut self.buf, self.max_payload)? {
            tracing::trace!(code = frame.code, size = frame.payload.len(), "frame reassembled");
            on_frame(frame);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_frame, FrameType, HEADER_SIZE};
    use crate::error::FrameError;

    fn wire(frames: &[(FrameType, &str)]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (ty, payload) in frames {
            encode_frame(ty.code(), payload.as_bytes(), &mut buf).unwrap();
        }
        buf.to_vec()
    }

    fn collect(reassembler: &mut FrameReassembler, chunk: &[u8]) -> Vec<Frame> {
        let mut out = Vec::new();
        reassembler.feed(chunk, |frame| out.push(frame)).unwrap();
        out
    }

    #[test]
    fn single_frame_in_one_chunk() {
        let bytes = wire(&[(FrameType::Req, "hello")]);
        let mut reassembler = FrameReassembler::new();

        let frames = collect(&mut reassembler, &bytes);

        assert_eq!(frames, vec![Frame::new(FrameType::Req, &b"hello"[..])]);
        assert_eq!(reassembler.buffered(), 0);
    }

    #[test]
    fn empty_body_yields_empty_payload() {
        let bytes = wire(&[(FrameType::Auth, "")]);
        let mut reassembler = FrameReassembler::new();

        let frames = collect(&mut reassembler, &bytes);

        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn byte_by_byte_delivery() {
        let bytes = wire(&[(FrameType::Resp, "slow")]);
        let mut reassembler = FrameReassembler::new();

        let mut frames = Vec::new();
        for (i, byte) in bytes.iter().enumerate() {
            let delivered = reassembler
                .feed(std::slice::from_ref(byte), |frame| frames.push(frame))
                .unwrap();
            if i + 1 < bytes.len() {
                assert_eq!(delivered, 0);
                assert_eq!(reassembler.buffered(), i + 1);
            }
        }

        assert_eq!(frames, vec![Frame::new(FrameType::Resp, &b"slow"[..])]);
    }

    #[test]
    fn header_split_from_body() {
        let bytes = wire(&[(FrameType::AuthAccept, r#"{"code":"SUCCESS"}"#)]);
        let mut reassembler = FrameReassembler::new();

        assert!(collect(&mut reassembler, &bytes[..HEADER_SIZE]).is_empty());
        assert_eq!(reassembler.buffered(), HEADER_SIZE);

        let frames = collect(&mut reassembler, &bytes[HEADER_SIZE..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type().unwrap(), FrameType::AuthAccept);
    }

    #[test]
    fn arbitrary_chunking_matches_whole_buffer() {
        let bytes = wire(&[
            (FrameType::Auth, ""),
            (FrameType::AuthAccept, r#"{"code":"SUCCESS"}"#),
            (FrameType::Req, r#"{"id":0,"name":"echo","params":{}}"#),
            (FrameType::Resp, r#"{"id":0,"code":"SUCCESS","data":"hi"}"#),
        ]);

        let mut whole = FrameReassembler::new();
        let expected = collect(&mut whole, &bytes);
        assert_eq!(expected.len(), 4);

        for chunk_size in [1usize, 2, 3, 5, 6, 7, 11, 64] {
            let mut reassembler = FrameReassembler::new();
            let mut frames = Vec::new();
            for chunk in bytes.chunks(chunk_size) {
                reassembler
                    .feed(chunk, |frame| frames.push(frame))
                    .unwrap();
            }
            assert_eq!(frames, expected, "chunk size {chunk_size}");
            assert_eq!(reassembler.buffered(), 0);
        }
    }

    #[test]
    fn trailing_partial_frame_stays_buffered() {
        let mut bytes = wire(&[(FrameType::Req, "one"), (FrameType::Req, "two")]);
        bytes.truncate(bytes.len() - 1);
        let mut reassembler = FrameReassembler::new();

        let frames = collect(&mut reassembler, &bytes);

        assert_eq!(frames.len(), 1);
        assert_eq!(reassembler.buffered(), HEADER_SIZE + 2);

        let rest = collect(&mut reassembler, b"o");
        assert_eq!(rest, vec![Frame::new(FrameType::Req, &b"two"[..])]);
    }

    #[test]
    fn oversized_declared_length_is_rejected() {
        let bytes = wire(&[(FrameType::Req, "0123456789")]);
        let mut reassembler = FrameReassembler::with_max_payload(4);

        let err = reassembler.feed(&bytes, |_| {}).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 10, max: 4 }));
    }
}
