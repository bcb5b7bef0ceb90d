use std::ops::Range;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::key::{PipeKey, KEY_LENGTH};
use crate::payload::{is_valid_tag, PipeEvent};
use crate::status::PipeStatus;

/// Separates the payload tag from the decimal length.
pub const TAG_DELIMITER: u8 = b'#';

/// Separates the decimal length from the body.
pub const LENGTH_DELIMITER: u8 = b'$';

/// Default maximum payload body size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Default maximum payload tag length.
pub const DEFAULT_MAX_TAG_LEN: usize = 64;

/// `usize::MAX` has 20 decimal digits on 64-bit targets.
const MAX_LENGTH_DIGITS: usize = 20;

/// One decoded wire segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// `KEY STATUS`, no payload.
    Status { key: PipeKey, status: PipeStatus },
    /// `KEY TAG # LEN $ BODY`.
    Payload {
        key: PipeKey,
        tag: String,
        body: Bytes,
    },
}

impl Segment {
    pub fn status(key: PipeKey, status: PipeStatus) -> Self {
        Self::Status { key, status }
    }

    pub fn payload(key: PipeKey, tag: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::Payload {
            key,
            tag: tag.into(),
            body: body.into(),
        }
    }

    pub fn key(&self) -> &PipeKey {
        match self {
            Self::Status { key, .. } | Self::Payload { key, .. } => key,
        }
    }

    /// The total wire size of this segment.
    pub fn wire_size(&self) -> usize {
        match self {
            Self::Status { .. } => KEY_LENGTH + 1,
            Self::Payload { tag, body, .. } => {
                KEY_LENGTH + tag.len() + 2 + decimal_digits(body.len()) + body.len()
            }
        }
    }
}

/// Configuration for the segment codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload body size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Maximum payload tag length. Default: 64.
    pub max_tag_len: usize,
    /// Whether `e` after a key is a CONTINUE status. When false the byte is
    /// read as the start of a payload tag and rejected.
    pub continue_supported: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            max_tag_len: DEFAULT_MAX_TAG_LEN,
            continue_supported: false,
        }
    }
}

/// Encode a payload-less segment.
///
/// ```text
/// ┌────────────┬────────────┐
/// │ Key (6B)   │ Status(1B) │
/// │ [0-9a-zA-Z]│ o d e l    │
/// └────────────┴────────────┘
/// ```
pub fn encode_status(key: &PipeKey, status: PipeStatus, dst: &mut BytesMut) {
    dst.reserve(KEY_LENGTH + 1);
    dst.put_slice(key.as_bytes());
    dst.put_u8(status.as_byte());
}

/// Encode a payload segment from an already serialized body.
///
/// ```text
/// ┌────────────┬─────────┬───┬──────────────┬───┬───────────────┐
/// │ Key (6B)   │ Tag     │ # │ Len (ASCII   │ $ │ Body          │
/// │            │ [A-Z].. │   │ decimal)     │   │ (Len bytes)   │
/// └────────────┴─────────┴───┴──────────────┴───┴───────────────┘
/// ```
pub fn encode_payload(key: &PipeKey, tag: &str, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    if !is_valid_tag(tag, DEFAULT_MAX_TAG_LEN) {
        return Err(FrameError::InvalidTag(tag.to_string()));
    }
    let len = body.len().to_string();
    dst.reserve(KEY_LENGTH + tag.len() + len.len() + 2 + body.len());
    dst.put_slice(key.as_bytes());
    dst.put_slice(tag.as_bytes());
    dst.put_u8(TAG_DELIMITER);
    dst.put_slice(len.as_bytes());
    dst.put_u8(LENGTH_DELIMITER);
    dst.put_slice(body);
    Ok(())
}

/// Serialize `event` and encode it as a payload segment for `key`.
pub fn encode_event(key: &PipeKey, event: &dyn PipeEvent, dst: &mut BytesMut) -> Result<()> {
    let mut body = BytesMut::new();
    event.encode_body(&mut body)?;
    encode_payload(key, event.tag(), &body, dst)
}

/// Encode any segment.
pub fn encode_segment(segment: &Segment, dst: &mut BytesMut) -> Result<()> {
    match segment {
        Segment::Status { key, status } => {
            encode_status(key, *status, dst);
            Ok(())
        }
        Segment::Payload { key, tag, body } => encode_payload(key, tag, body, dst),
    }
}

/// Parse the segment at the start of `src` without consuming anything.
///
/// Returns the segment and its wire length, or `Ok(None)` if `src` does not
/// yet hold a complete segment. Malformed input is a hard error.
pub fn parse_segment(src: &[u8], config: &FrameConfig) -> Result<Option<(Segment, usize)>> {
    let Some(header) = parse_header(src, config)? else {
        return Ok(None);
    };
    let segment = match header.kind {
        HeaderKind::Status(status) => Segment::status(header.key, status),
        HeaderKind::Payload { tag, body } => Segment::payload(
            header.key,
            tag_string(&src[tag]),
            Bytes::copy_from_slice(&src[body]),
        ),
    };
    Ok(Some((segment, header.len)))
}

/// Decode a segment from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete segment yet.
/// On success, consumes the segment bytes from the buffer.
pub fn decode_segment(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Segment>> {
    let Some(header) = parse_header(src, config)? else {
        return Ok(None);
    };
    let mut raw = src.split_to(header.len);
    let segment = match header.kind {
        HeaderKind::Status(status) => Segment::status(header.key, status),
        HeaderKind::Payload { tag, body } => {
            let tag = tag_string(&raw[tag]);
            raw.advance(body.start);
            Segment::payload(header.key, tag, raw.freeze())
        }
    };
    Ok(Some(segment))
}

struct Header {
    key: PipeKey,
    kind: HeaderKind,
    len: usize,
}

enum HeaderKind {
    Status(PipeStatus),
    Payload { tag: Range<usize>, body: Range<usize> },
}

fn parse_header(src: &[u8], config: &FrameConfig) -> Result<Option<Header>> {
    if src.len() <= KEY_LENGTH {
        return Ok(None);
    }
    let key = PipeKey::from_bytes(&src[..KEY_LENGTH])?;

    if let Some(status) = PipeStatus::from_byte(src[KEY_LENGTH]) {
        if status != PipeStatus::Continue || config.continue_supported {
            return Ok(Some(Header {
                key,
                kind: HeaderKind::Status(status),
                len: KEY_LENGTH + 1,
            }));
        }
    }

    let tag_start = KEY_LENGTH;
    let Some(tag_end) = scan_tag(src, tag_start, config.max_tag_len)? else {
        return Ok(None);
    };
    let digits_start = tag_end + 1;
    let Some((body_len, digits_end)) = scan_length(src, digits_start)? else {
        return Ok(None);
    };
    if body_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: body_len,
            max: config.max_payload_size,
        });
    }

    let body_start = digits_end + 1;
    let total = body_start
        .checked_add(body_len)
        .ok_or(FrameError::InvalidLength)?;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    Ok(Some(Header {
        key,
        kind: HeaderKind::Payload {
            tag: tag_start..tag_end,
            body: body_start..total,
        },
        len: total,
    }))
}

/// Returns the index of the `#` closing the tag that starts at `start`.
fn scan_tag(src: &[u8], start: usize, max_len: usize) -> Result<Option<usize>> {
    for (offset, &byte) in src[start..].iter().enumerate() {
        let valid = match offset {
            0 => byte.is_ascii_uppercase(),
            _ if byte == TAG_DELIMITER => return Ok(Some(start + offset)),
            _ => byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'_',
        };
        if !valid || offset >= max_len {
            let end = (start + offset + 1).min(src.len());
            return Err(FrameError::InvalidTag(tag_string(&src[start..end])));
        }
    }
    Ok(None)
}

/// Returns the body length and the index of the closing `$`.
fn scan_length(src: &[u8], start: usize) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;
    for (offset, &byte) in src.get(start..).unwrap_or_default().iter().enumerate() {
        match byte {
            LENGTH_DELIMITER if offset > 0 => return Ok(Some((value, start + offset))),
            b'0'..=b'9' if offset < MAX_LENGTH_DIGITS => {
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(usize::from(byte - b'0')))
                    .ok_or(FrameError::InvalidLength)?;
            }
            _ => return Err(FrameError::InvalidLength),
        }
    }
    Ok(None)
}

fn tag_string(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}
