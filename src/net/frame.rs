//! Length-prefixed multipart framing shared by the control and broadcast
//! channels.
//!
//! Layout: `[u32 body_len][u16 part_count]` then `part_count` times
//! `[u32 part_len][part bytes]`, all big-endian. `body_len` counts every byte
//! after the length field. A frame is decoded whole or not at all, so a reader
//! never observes a topic without its content.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const LENGTH_FIELD_LEN: usize = 4;
const PART_COUNT_LEN: usize = 2;
const PART_LEN_LEN: usize = 4;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Subscription control byte: add the following prefix.
pub const SUBSCRIBE: u8 = 0x01;
/// Subscription control byte: drop the following prefix.
pub const UNSUBSCRIBE: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub parts: Vec<Bytes>,
}

impl Frame {
    pub fn single(part: impl Into<Bytes>) -> Self {
        Self {
            parts: vec![part.into()],
        }
    }

    /// Two-part broadcast frame: topic first, then content.
    pub fn topic_message(topic: &str, content: &str) -> Self {
        Self {
            parts: vec![
                Bytes::copy_from_slice(topic.as_bytes()),
                Bytes::copy_from_slice(content.as_bytes()),
            ],
        }
    }

    pub fn subscription(subscribe: bool, prefix: &str) -> Self {
        let mut buf = BytesMut::with_capacity(1 + prefix.len());
        buf.put_u8(if subscribe { SUBSCRIBE } else { UNSUBSCRIBE });
        buf.put_slice(prefix.as_bytes());
        Self::single(buf.freeze())
    }

    /// The only part of a single-part frame, as (lossy) UTF-8.
    pub fn into_text(self) -> Result<String, FrameDecodeError> {
        match self.parts.as_slice() {
            [part] => Ok(String::from_utf8_lossy(part).into_owned()),
            parts => Err(FrameDecodeError::UnexpectedParts {
                expected: 1,
                found: parts.len(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("invalid frame length: {0}")]
    InvalidLength(u32),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u32),

    #[error("frame has no parts")]
    Empty,

    #[error("expected {expected} part(s), found {found}")]
    UnexpectedParts { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum FrameEncodeError {
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("too many parts: {0}")]
    TooManyParts(usize),

    #[error("frame has no parts")]
    Empty,
}

/// Body length a frame with these part sizes would encode to. `None` on
/// overflow.
pub fn body_len_for<I>(part_lens: I) -> Option<usize>
where
    I: IntoIterator<Item = usize>,
{
    part_lens
        .into_iter()
        .try_fold(PART_COUNT_LEN, |acc, len| {
            acc.checked_add(PART_LEN_LEN)?.checked_add(len)
        })
}

/// Encode a frame into the provided buffer.
pub fn encode_frame(
    frame: &Frame,
    dst: &mut BytesMut,
    max_frame_bytes: usize,
) -> Result<(), FrameEncodeError> {
    if frame.parts.is_empty() {
        return Err(FrameEncodeError::Empty);
    }
    let part_count = u16::try_from(frame.parts.len())
        .map_err(|_| FrameEncodeError::TooManyParts(frame.parts.len()))?;

    let body_len = body_len_for(frame.parts.iter().map(|p| p.len()))
        .ok_or(FrameEncodeError::FrameTooLarge(usize::MAX))?;

    if body_len > max_frame_bytes || body_len > u32::MAX as usize {
        return Err(FrameEncodeError::FrameTooLarge(body_len));
    }

    dst.reserve(LENGTH_FIELD_LEN + body_len);
    dst.put_u32(body_len as u32);
    dst.put_u16(part_count);
    for part in &frame.parts {
        dst.put_u32(part.len() as u32);
        dst.put_slice(part);
    }
    Ok(())
}

/// Encode a frame into a fresh, shareable buffer.
pub fn encode_to_bytes(
    frame: &Frame,
    max_frame_bytes: usize,
) -> Result<Bytes, FrameEncodeError> {
    let mut buf = BytesMut::new();
    encode_frame(frame, &mut buf, max_frame_bytes)?;
    Ok(buf.freeze())
}

/// Try to decode a single frame from the buffer.
///
/// Returns `Ok(None)` if there is not yet enough data to decode a full frame.
/// On error the buffer is left untouched; callers drop the connection.
pub fn try_decode_frame(
    src: &mut BytesMut,
    max_frame_bytes: usize,
) -> Result<Option<Frame>, FrameDecodeError> {
    if src.len() < LENGTH_FIELD_LEN {
        return Ok(None);
    }

    let mut length_bytes = &src[..LENGTH_FIELD_LEN];
    let body_len = length_bytes.get_u32();

    if (body_len as usize) < PART_COUNT_LEN {
        return Err(FrameDecodeError::InvalidLength(body_len));
    }
    if body_len as usize > max_frame_bytes {
        return Err(FrameDecodeError::FrameTooLarge(body_len));
    }

    let total = LENGTH_FIELD_LEN + body_len as usize;
    if src.len() < total {
        return Ok(None);
    }

    // Validate the part table before consuming anything.
    let mut body = &src[LENGTH_FIELD_LEN..total];
    let part_count = body.get_u16() as usize;
    if part_count == 0 {
        return Err(FrameDecodeError::Empty);
    }
    let mut lengths = Vec::with_capacity(part_count);
    for _ in 0..part_count {
        if body.remaining() < PART_LEN_LEN {
            return Err(FrameDecodeError::InvalidLength(body_len));
        }
        let len = body.get_u32() as usize;
        if body.remaining() < len {
            return Err(FrameDecodeError::InvalidLength(body_len));
        }
        body.advance(len);
        lengths.push(len);
    }
    if body.has_remaining() {
        return Err(FrameDecodeError::InvalidLength(body_len));
    }

    let mut frame_bytes = src.split_to(total).freeze();
    frame_bytes.advance(LENGTH_FIELD_LEN + PART_COUNT_LEN);
    let mut parts = Vec::with_capacity(part_count);
    for len in lengths {
        frame_bytes.advance(PART_LEN_LEN);
        parts.push(frame_bytes.split_to(len));
    }

    Ok(Some(Frame { parts }))
}
