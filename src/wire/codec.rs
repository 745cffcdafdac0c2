use super::frame::{
    Frame, Metadata, TAG_ABORT, TAG_END, TAG_MESSAGE, TAG_OPEN, TAG_READY, TAG_REJECT,
};
use crate::{EchoError, Message, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default upper bound for a single frame (tag plus body)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Length-prefixed frame codec
///
/// Every frame is a big-endian `u32` length followed by that many bytes: a
/// one byte tag and the tag-specific body. Strings inside `Open` are
/// prefixed with a `u16` length.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use echorpc::wire::{Frame, FrameCodec};
/// use echorpc::Message;
/// use tokio_util::codec::{Decoder, Encoder};
///
/// let mut codec = FrameCodec::default();
/// let mut buf = BytesMut::new();
/// codec.encode(Frame::Message(Message::new("hi")), &mut buf).unwrap();
/// assert_eq!(&buf[..], &[0, 0, 0, 3, 0x04, b'h', b'i']);
///
/// let frame = codec.decode(&mut buf).unwrap();
/// assert_eq!(frame, Some(Frame::Message(Message::new("hi"))));
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Creates a codec rejecting frames larger than `max_frame_size` bytes.
    ///
    /// The limit is capped at `u32::MAX`, the largest length the header can carry.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(u32::MAX as usize),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = EchoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len == 0 {
            return Err(EchoError::Protocol("empty frame".to_string()));
        }
        if len > self.max_frame_size {
            return Err(EchoError::Protocol(format!(
                "frame of {} bytes exceeds limit of {} bytes",
                len, self.max_frame_size
            )));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let mut body = src.split_to(len).freeze();
        let tag = body.get_u8();
        decode_body(tag, body).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = EchoError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::new();
        body.put_u8(frame.tag());

        match &frame {
            Frame::Open { method, metadata } => {
                put_short_string(&mut body, method)?;
                let count = u16::try_from(metadata.len()).map_err(|_| {
                    EchoError::Protocol(format!("too many metadata entries: {}", metadata.len()))
                })?;
                body.put_u16(count);
                for (key, value) in metadata {
                    put_short_string(&mut body, key)?;
                    put_short_string(&mut body, value)?;
                }
            }
            Frame::Ready | Frame::End => {}
            Frame::Reject { reason } | Frame::Abort { reason } => {
                body.put_slice(reason.as_bytes());
            }
            Frame::Message(message) => body.put_slice(message.text().as_bytes()),
        }

        let len = u32::try_from(body.len())
            .ok()
            .filter(|_| body.len() <= self.max_frame_size)
            .ok_or_else(|| {
                EchoError::Protocol(format!(
                    "{} frame of {} bytes exceeds limit of {} bytes",
                    frame.kind(),
                    body.len(),
                    self.max_frame_size
                ))
            })?;

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u32(len);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

fn decode_body(tag: u8, mut body: Bytes) -> Result<Frame> {
    match tag {
        TAG_OPEN => {
            let method = read_short_string(&mut body)?;
            if body.remaining() < 2 {
                return Err(truncated("open"));
            }
            let count = body.get_u16();
            let mut metadata = Metadata::new();
            for _ in 0..count {
                let key = read_short_string(&mut body)?;
                let value = read_short_string(&mut body)?;
                metadata.insert(key, value);
            }
            expect_consumed(&body, "open")?;
            Ok(Frame::Open { method, metadata })
        }
        TAG_READY => expect_consumed(&body, "ready").map(|_| Frame::Ready),
        TAG_REJECT => Ok(Frame::Reject {
            reason: utf8(body)?,
        }),
        TAG_MESSAGE => Ok(Frame::Message(Message::new(utf8(body)?))),
        TAG_END => expect_consumed(&body, "end").map(|_| Frame::End),
        TAG_ABORT => Ok(Frame::Abort {
            reason: utf8(body)?,
        }),
        other => Err(EchoError::Protocol(format!("unknown frame tag {other:#04x}"))),
    }
}

fn put_short_string(dst: &mut BytesMut, value: &str) -> Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| EchoError::Protocol(format!("string of {} bytes is too long", value.len())))?;
    dst.put_u16(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

fn read_short_string(src: &mut Bytes) -> Result<String> {
    if src.remaining() < 2 {
        return Err(truncated("open"));
    }
    let len = src.get_u16() as usize;
    if src.remaining() < len {
        return Err(truncated("open"));
    }
    utf8(src.split_to(len))
}

fn utf8(bytes: Bytes) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| EchoError::Protocol(format!("invalid UTF-8 in frame: {e}")))
}

fn expect_consumed(body: &Bytes, kind: &str) -> Result<()> {
    if body.has_remaining() {
        return Err(EchoError::Protocol(format!(
            "{} trailing bytes in {kind} frame",
            body.remaining()
        )));
    }
    Ok(())
}

fn truncated(kind: &str) -> EchoError {
    EchoError::Protocol(format!("truncated {kind} frame"))
}
