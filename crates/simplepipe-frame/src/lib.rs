//! Segment framing for simplepipe push channels.
//!
//! A response body is a concatenation of segments, each addressed to one pipe:
//! - a 6-character key from `[0-9a-zA-Z]`
//! - either a 1-byte status (`o` ok, `d` destroyed, `e` continue, `l` lost)
//! - or a payload `TAG#LEN$BODY` with an ASCII decimal length
//!
//! Decoding never blocks on partial input: incomplete segments report
//! `Ok(None)` and are retried once more bytes arrive.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod key;
pub mod payload;
pub mod reader;
pub mod registry;
pub mod request;
pub mod status;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::SegmentCodec;
pub use codec::{
    decode_segment, encode_event, encode_payload, encode_segment, encode_status, parse_segment,
    FrameConfig, Segment, DEFAULT_MAX_PAYLOAD, DEFAULT_MAX_TAG_LEN,
};
pub use error::{FrameError, Result};
pub use key::{PipeKey, KEY_LENGTH};
pub use payload::{
    is_valid_tag, priority, read_json, write_json, CacheFlag, Cacheable, PipeEvent, PipeSequence,
    SEQUENCE_TAG,
};
pub use reader::SegmentReader;
pub use registry::{BodyValidator, PayloadRegistry};
pub use request::{PipeRequest, RequestType};
pub use status::PipeStatus;
pub use writer::SegmentWriter;
