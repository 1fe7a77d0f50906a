use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    de,
    error::ProtoError,
    types::{Frame, HEADER_LEN, MESSAGE_ID_LEN},
};

/// Length-prefixed frame codec: `[0x00][bodyLen][body..]`.
///
/// A zero body length is how a unit signals it hung up, so the decoder
/// reports it as [`ProtoError::PeerHangup`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let body_len = src[1] as usize;
        if body_len == 0 {
            src.advance(HEADER_LEN);
            return Err(ProtoError::PeerHangup);
        }

        if src.len() < HEADER_LEN + body_len {
            src.reserve(HEADER_LEN + body_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(body_len).freeze();
        let message_id = de::message_id(&body).unwrap_or(0);
        let payload = if body.len() > MESSAGE_ID_LEN {
            body.slice(MESSAGE_ID_LEN..)
        } else {
            Bytes::new()
        };

        Ok(Some(Frame {
            message_id,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtoError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst);
        Ok(())
    }
}

/// Pre-encoded frames, as produced by the `ser` functions, pass through untouched.
impl Encoder<Bytes> for FrameCodec {
    type Error = ProtoError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
