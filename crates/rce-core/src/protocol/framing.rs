//! Length-prefixed frame codec.
//!
//! Each frame is a 4-byte big-endian length prefix followed by the payload.
//! The codec plugs into [`tokio_util::codec::Framed`] so both sides of a
//! connection read and write whole frames rather than raw bytes.
//!
//! The announced length is validated against the configured maximum before
//! any allocation happens, so a hostile peer cannot force a large allocation
//! with a forged prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::{ProtocolError, ProtocolResult, MAX_FRAME_SIZE};

/// Length of the frame header.
const HEADER_LEN: usize = 4;

/// Frame codec for the rce wire protocol.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec with the protocol-wide maximum frame size.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom maximum frame size. Used by tests to
    /// exercise the size limit without multi-megabyte payloads.
    #[must_use]
    pub const fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<Bytes>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        let total = HEADER_LEN + length;
        if src.len() < total {
            // Reserve the rest of the frame up front to avoid repeated
            // reallocation while it trickles in.
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> ProtocolResult<()> {
        if item.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: item.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(HEADER_LEN + item.len());
        #[allow(clippy::cast_possible_truncation)] // bounded by max_frame_size
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut codec = FrameCodec::new();
        let payload = Bytes::from_static(b"spawn frame");

        let mut buf = BytesMut::new();
        codec.encode(payload.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN + payload.len());
        assert_eq!(&buf[..4], &[0, 0, 0, 11]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_header_waits_for_more() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn partial_payload_waits_for_more() {
        let mut codec = FrameCodec::new();
        // Header announces 8 bytes but only 3 have arrived.
        let mut buf = BytesMut::from(&[0u8, 0, 0, 8, 1, 2, 3][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn oversized_frame_is_rejected_before_allocation() {
        let mut codec = FrameCodec::with_max_size(16);
        let mut buf = BytesMut::new();
        buf.put_u32(64);
        buf.extend_from_slice(&[0u8; 8]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FrameTooLarge { size: 64, max: 16 }
        ));
    }

    #[test]
    fn oversized_frame_is_rejected_on_encode() {
        let mut codec = FrameCodec::with_max_size(4);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(Bytes::from_static(b"too long"), &mut buf)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { size: 8, max: 4 }));
    }

    #[test]
    fn empty_frame_is_valid() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::new(), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 0]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn back_to_back_frames_decode_in_order() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"first"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"second"), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "first");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "second");
        assert!(buf.is_empty());
    }
}
