use crate::messages::KestrelMessage;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Maximum size of a single frame on the wire
pub const MAX_FRAME_LENGTH: usize = 32 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("frame error: {0}")]
    Frame(#[from] std::io::Error),

    #[error("malformed message payload: {0}")]
    Payload(#[from] bincode::Error),
}

/// Frames [`KestrelMessage`]s with a big-endian `u32` length prefix and encodes the frame body with bincode
pub struct MessageCodec {
    frames: LengthDelimitedCodec,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        let frames =
            LengthDelimitedCodec::builder().big_endian().length_field_length(4).max_frame_length(max_frame_length).new_codec();
        Self { frames }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = KestrelMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(bincode::deserialize(&frame)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<KestrelMessage> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: KestrelMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = bincode::serialize(&item)?;
        self.frames.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Payload, PingMessage, RejectMessage};
    use bytes::BufMut;

    #[test]
    fn test_frame_layout() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(KestrelMessage::new(Payload::Ping(PingMessage { nonce: 7 })), &mut buf).unwrap();

        let body_len = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
        assert_eq!(body_len, buf.len() - 4);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded.payload, Payload::Ping(PingMessage { nonce: 7 })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits_for_more_bytes() {
        let mut codec = MessageCodec::new();
        let mut full = BytesMut::new();
        codec.encode(KestrelMessage::new(Payload::Reject(RejectMessage { reason: "bye".to_owned() })), &mut full).unwrap();

        let mut partial = full.split_to(full.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(full);
        assert!(matches!(codec.decode(&mut partial).unwrap().unwrap().payload, Payload::Reject(_)));
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut codec = MessageCodec::with_max_frame_length(16);
        let mut buf = BytesMut::new();
        buf.put_u32(17);
        buf.put_slice(&[0u8; 17]);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Frame(_))));
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(4);
        // Variant index far beyond the payload enum
        buf.put_u32_le(u32::MAX);
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Payload(_))));
    }
}
