use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Tag of the sequence acknowledgement payload.
pub const SEQUENCE_TAG: &str = "SPS";

/// Priority values understood by the delivery buffer's resort.
///
/// Items without a priority rank as [`IMPORTANT`]. A priority item ranks above
/// them when its priority is at least [`IMPORTANT`], below otherwise.
pub mod priority {
    pub const IMPORTANT: i32 = 32;
    pub const NORMAL: i32 = 16;
    pub const LOW: i32 = 8;
}

/// An event that can travel through a pipe.
///
/// Optional capabilities are exposed through [`PipeEvent::as_cacheable`] and
/// [`PipeEvent::priority`]; the buffer checks each once per item.
pub trait PipeEvent: Any + Send + Sync + fmt::Debug {
    /// Wire tag, e.g. `"SPS"`. First character is an ASCII uppercase letter.
    fn tag(&self) -> &str;

    /// Serialize the body (the bytes after `$`).
    fn encode_body(&self, dst: &mut BytesMut) -> Result<()>;

    fn as_cacheable(&self) -> Option<&dyn Cacheable> {
        None
    }

    fn priority(&self) -> Option<i32> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// In-place merge capability for buffered items.
///
/// While an item is cached it sits in a buffer waiting to be flushed, and a
/// later push of the same logical item merges into it instead of appending.
pub trait Cacheable {
    fn is_cached(&self) -> bool;

    fn set_cached(&self, cached: bool);

    /// Whether `other` is the same logical item as `self`.
    fn same_item(&self, other: &dyn PipeEvent) -> bool;

    /// Merge newer state from `other` into `self`.
    fn synchronize_from(&self, other: &dyn PipeEvent);
}

/// Thread-safe cached flag for [`Cacheable`] implementors.
#[derive(Debug, Default)]
pub struct CacheFlag(AtomicBool);

impl CacheFlag {
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, cached: bool) {
        self.0.store(cached, Ordering::Release);
    }
}

/// Serialize `value` as JSON into `dst`, attributing failures to `tag`.
pub fn write_json<T: Serialize + ?Sized>(tag: &str, value: &T, dst: &mut BytesMut) -> Result<()> {
    serde_json::to_writer(dst.writer(), value).map_err(|source| FrameError::Body {
        tag: tag.to_string(),
        source,
    })
}

/// Deserialize a JSON body, attributing failures to `tag`.
pub fn read_json<T: for<'de> Deserialize<'de>>(tag: &str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|source| FrameError::Body {
        tag: tag.to_string(),
        source,
    })
}

/// Returns true if `tag` is usable on the wire.
///
/// The first character must be an ASCII uppercase letter so that it can never
/// be confused with a status byte; the rest may be ASCII alphanumerics, `.`
/// or `_`.
pub fn is_valid_tag(tag: &str, max_len: usize) -> bool {
    let bytes = tag.as_bytes();
    match bytes.first() {
        Some(first) if first.is_ascii_uppercase() => {}
        _ => return false,
    }
    bytes.len() <= max_len
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'.' || *b == b'_')
}

/// Sequence acknowledgement carried alongside delivered data.
///
/// Receiving one raises the local pipe sequence to `sequence`; it is never
/// handed to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeSequence {
    #[serde(rename = "s")]
    pub sequence: u64,
}

impl PipeSequence {
    pub fn new(sequence: u64) -> Self {
        Self { sequence }
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        read_json(SEQUENCE_TAG, body)
    }
}

impl PipeEvent for PipeSequence {
    fn tag(&self) -> &str {
        SEQUENCE_TAG
    }

    fn encode_body(&self, dst: &mut BytesMut) -> Result<()> {
        write_json(SEQUENCE_TAG, self, dst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
