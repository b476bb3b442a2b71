//! Length-prefixed frame codec for `tokio_util::codec::Framed`.
//!
//! ```text
//! ┌──────────────────────┬─────────────────────────────┐
//! │ length: u32 (BE)     │ body: JSON object (length)  │
//! └──────────────────────┴─────────────────────────────┘
//! ```
//!
//! A short buffer is never an error: the decoder asks for more bytes. A
//! complete frame whose body is not a JSON object is logged and skipped,
//! since the length prefix lets the stream resynchronise past it.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::XfsError;
use crate::frame::Frame;

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Largest accepted frame body.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct XfsCodec;

impl Decoder for XfsCodec {
    type Item = Frame;
    type Error = XfsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < LENGTH_PREFIX {
                return Ok(None);
            }

            let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
            if len > MAX_FRAME_SIZE {
                return Err(XfsError::FrameTooLarge {
                    size: len,
                    max: MAX_FRAME_SIZE,
                });
            }

            if src.len() < LENGTH_PREFIX + len {
                src.reserve(LENGTH_PREFIX + len - src.len());
                return Ok(None);
            }

            src.advance(LENGTH_PREFIX);
            let body = src.split_to(len);

            match Frame::from_bytes(&body) {
                Ok(frame) => return Ok(Some(frame)),
                Err(e) => {
                    tracing::warn!(len, "skipping undecodable frame: {e}");
                }
            }
        }
    }
}

impl Encoder<Frame> for XfsCodec {
    type Error = XfsError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.to_bytes()?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(XfsError::FrameTooLarge {
                size: body.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(LENGTH_PREFIX + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoded(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        XfsCodec.encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn prefix_is_big_endian_body_length() {
        let frame = Frame::new().with("msgid", "{1}");
        let body_len = frame.to_bytes().unwrap().len();
        let buf = encoded(frame);
        assert_eq!(&buf[..4], &(body_len as u32).to_be_bytes());
        assert_eq!(buf.len(), LENGTH_PREFIX + body_len);
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let full = encoded(Frame::execute("{1}", "RESET", json!(null)));
        let mut codec = XfsCodec;

        let mut src = BytesMut::from(&full[..2]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        let mut src = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert_eq!(src.len(), full.len() - 1);

        src.extend_from_slice(&full[full.len() - 1..]);
        let frame = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.msgid(), Some("{1}"));
        assert!(src.is_empty());
    }

    #[test]
    fn back_to_back_frames() {
        let mut src = encoded(Frame::new().with("msgid", "{a}"));
        src.extend_from_slice(&encoded(Frame::new().with("msgid", "{b}")));

        let mut codec = XfsCodec;
        assert_eq!(codec.decode(&mut src).unwrap().unwrap().msgid(), Some("{a}"));
        assert_eq!(codec.decode(&mut src).unwrap().unwrap().msgid(), Some("{b}"));
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn malformed_body_is_skipped() {
        let mut src = BytesMut::new();
        src.put_u32(3);
        src.extend_from_slice(b"{{{");
        src.extend_from_slice(&encoded(Frame::new().with("msgid", "{ok}")));

        let frame = XfsCodec.decode(&mut src).unwrap().unwrap();
        assert_eq!(frame.msgid(), Some("{ok}"));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut src = BytesMut::new();
        src.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(
            XfsCodec.decode(&mut src),
            Err(XfsError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn frame_split_across_reads() {
        use futures::StreamExt;
        use tokio_util::codec::FramedRead;

        let bytes = encoded(Frame::new().with("msgid", "{split}"));
        let (head, tail) = bytes.split_at(6);
        let mock = tokio_test::io::Builder::new().read(head).read(tail).build();

        let mut reader = FramedRead::new(mock, XfsCodec);
        let frame = reader.next().await.unwrap().unwrap();
        assert_eq!(frame.msgid(), Some("{split}"));
        assert!(reader.next().await.is_none());
    }
}
