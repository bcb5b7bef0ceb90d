use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_segment, encode_segment, FrameConfig, Segment};
use crate::error::FrameError;

/// `tokio_util` codec for pipe segments, for use with `FramedRead`/`FramedWrite`.
#[derive(Debug, Clone, Default)]
pub struct SegmentCodec {
    config: FrameConfig,
}

impl SegmentCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for SegmentCodec {
    type Item = Segment;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Segment>, FrameError> {
        decode_segment(src, &self.config)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Segment>, FrameError> {
        match self.decode(src)? {
            Some(segment) => Ok(Some(segment)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Segment> for SegmentCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Segment, dst: &mut BytesMut) -> Result<(), FrameError> {
        if let Segment::Payload { body, .. } = &item {
            if body.len() > self.config.max_payload_size {
                return Err(FrameError::PayloadTooLarge {
                    size: body.len(),
                    max: self.config.max_payload_size,
                });
            }
        }
        encode_segment(&item, dst)
    }
}
