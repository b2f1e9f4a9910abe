use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: type (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Type code reserved for a dedicated rejection notice. Never emitted;
/// rejections travel as `AUTH_ACCEPT` with a failure code.
pub const RESERVED_AUTH_REJECT: u16 = 4;

/// Protocol frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameType {
    /// Call request: JSON `{id, name, params}`.
    Req = 0,
    /// Call response: JSON `{id, code, data?, errmsg?}`.
    Resp = 1,
    /// Opaque credential payload produced by the authenticator.
    Auth = 2,
    /// Verdict on the peer's credentials: JSON `{code, errmsg?}`.
    AuthAccept = 3,
}

impl FrameType {
    /// Wire code for this type.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Human-readable name, as used in logs.
    pub fn name(self) -> &'static str {
        match self {
            FrameType::Req => "REQ",
            FrameType::Resp => "RESP",
            FrameType::Auth => "AUTH",
            FrameType::AuthAccept => "AUTH_ACCEPT",
        }
    }
}

impl TryFrom<u16> for FrameType {
    type Error = FrameError;

    fn try_from(code: u16) -> Result<Self> {
        match code {
            0 => Ok(FrameType::Req),
            1 => Ok(FrameType::Resp),
            2 => Ok(FrameType::Auth),
            3 => Ok(FrameType::AuthAccept),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single protocol message.
///
/// The type code is kept raw so that frames with unknown codes still reach
/// the dispatch boundary, where they are logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Wire type code.
    pub code: u16,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            code: frame_type.code(),
            payload: payload.into(),
        }
    }

    /// Resolve the type code.
    pub fn frame_type(&self) -> Result<FrameType> {
        FrameType::try_from(self.code)
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬────────────────┬──────────────────┐
/// │ Type (2B BE) │ Length (4B BE) │ Body (Length B)  │
/// └──────────────┴────────────────┴──────────────────┘
/// ```
pub fn encode_frame(code: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u16(code);
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet; in
/// that case nothing is consumed. On success, consumes the frame bytes.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let code = u16::from_be_bytes([src[0], src[1]]);
    let payload_len = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { code, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = br#"{"id":0,"name":"echo","params":{}}"#;

        encode_frame(FrameType::Req.code(), payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + payload.len());

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();

        assert_eq!(frame.frame_type().unwrap(), FrameType::Req);
        assert_eq!(frame.payload.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_is_big_endian() {
        let mut buf = BytesMut::new();
        encode_frame(FrameType::AuthAccept.code(), b"abc", &mut buf).unwrap();
        assert_eq!(&buf[..HEADER_SIZE], &[0x00, 0x03, 0x00, 0x00, 0x00, 0x03]);
        assert_eq!(&buf[HEADER_SIZE..], b"abc");
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00][..]);
        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_incomplete_payload_consumes_nothing() {
        let mut buf = BytesMut::new();
        encode_frame(FrameType::Resp.code(), b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 2);
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u16(FrameType::Req.code());
        buf.put_u32(1024 * 1024 * 32);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_unknown_type_still_decodes() {
        let mut buf = BytesMut::new();
        encode_frame(RESERVED_AUTH_REJECT, b"{}", &mut buf).unwrap();

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.code, RESERVED_AUTH_REJECT);
        assert!(matches!(
            frame.frame_type(),
            Err(FrameError::UnknownType(RESERVED_AUTH_REJECT))
        ));
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = BytesMut::new();
        encode_frame(FrameType::Auth.code(), b"", &mut buf).unwrap();

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.frame_type().unwrap(), FrameType::Auth);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_frame_type_codes() {
        for (code, ty) in [
            (0, FrameType::Req),
            (1, FrameType::Resp),
            (2, FrameType::Auth),
            (3, FrameType::AuthAccept),
        ] {
            assert_eq!(FrameType::try_from(code).unwrap(), ty);
            assert_eq!(ty.code(), code);
        }
        assert_eq!(FrameType::AuthAccept.to_string(), "AUTH_ACCEPT");
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::new(FrameType::Resp, Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), HEADER_SIZE + 4);
    }
}
