use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Frame header size: length(2)
pub const FRAME_HEADER_SIZE: usize = 2;

/// Maximum ciphertext bytes one frame can carry
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Client reads are capped at this many bytes, so one read always fits one
/// frame after the cipher adds its fixed overhead.
pub const MAX_CHUNK_SIZE: usize = 8192;

/// Frame parsing error
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("frame too large: {0}")]
    Oversized(usize),
}

impl From<FrameError> for crate::Error {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(e) => crate::Error::Io(e),
            other => crate::Error::Protocol(other.to_string()),
        }
    }
}

/// Codec for the relay framing: `length: u16 BE` followed by that many bytes
/// of ciphertext. The ciphertext is opaque at this layer; sealing and opening
/// happen in the tunnel.
pub struct RelayCodec;

impl Encoder<Bytes> for RelayCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_FRAME_SIZE {
            return Err(FrameError::Oversized(item.len()));
        }
        dst.reserve(FRAME_HEADER_SIZE + item.len());
        dst.put_u16(item.len() as u16);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

impl Decoder for RelayCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least the length prefix
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let payload_len = u16::from_be_bytes([src[0], src[1]]) as usize;

        // Check if we have the complete frame
        let total_len = FRAME_HEADER_SIZE + payload_len;
        if src.len() < total_len {
            // Reserve space for the full frame
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total_len);
        frame.advance(FRAME_HEADER_SIZE);
        Ok(Some(frame.freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let mut codec = RelayCodec;
        let mut buf = BytesMut::new();

        codec.encode(Bytes::from_static(b"sealed bytes"), &mut buf).unwrap();
        assert_eq!(&buf[..2], &[0x00, 0x0C]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], b"sealed bytes");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial() {
        let mut codec = RelayCodec;
        let mut buf = BytesMut::from(&[0x00, 0x05, b'h', b'e'][..]); // Incomplete

        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Add rest of payload
        buf.extend_from_slice(b"llo");
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], b"hello");
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut codec = RelayCodec;
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"one"), &mut buf).unwrap();
        codec.encode(Bytes::from_static(b"two"), &mut buf).unwrap();

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"one");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"two");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encode_oversized_rejected() {
        let mut codec = RelayCodec;
        let mut buf = BytesMut::new();
        let too_big = Bytes::from(vec![0u8; MAX_FRAME_SIZE + 1]);
        assert!(matches!(
            codec.encode(too_big, &mut buf),
            Err(FrameError::Oversized(_))
        ));
    }

    #[test]
    fn test_max_chunk_fits_one_frame() {
        assert!(MAX_CHUNK_SIZE + crate::crypto::OVERHEAD <= MAX_FRAME_SIZE);
    }
}
