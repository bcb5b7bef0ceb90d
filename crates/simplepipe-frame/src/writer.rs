use bytes::BytesMut;
use simplepipe_transport::PipeSender;

use crate::codec::{encode_payload, encode_segment, encode_status, FrameConfig, Segment};
use crate::error::{FrameError, Result};
use crate::key::PipeKey;
use crate::payload::PipeEvent;
use crate::status::PipeStatus;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Batches segments into one response body and hands it to a [`PipeSender`].
///
/// Segments accumulate in an internal buffer until [`SegmentWriter::flush`];
/// nothing reaches the transport before that.
pub struct SegmentWriter<S> {
    sender: S,
    buf: BytesMut,
    segments: usize,
    config: FrameConfig,
}

impl<S: PipeSender> SegmentWriter<S> {
    pub fn new(sender: S) -> Self {
        Self::with_config(sender, FrameConfig::default())
    }

    pub fn with_config(sender: S, config: FrameConfig) -> Self {
        Self {
            sender,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            segments: 0,
            config,
        }
    }

    pub fn push_status(&mut self, key: &PipeKey, status: PipeStatus) {
        encode_status(key, status, &mut self.buf);
        self.segments += 1;
    }

    pub fn push_payload(&mut self, key: &PipeKey, tag: &str, body: &[u8]) -> Result<()> {
        self.check_size(body.len())?;
        encode_payload(key, tag, body, &mut self.buf)?;
        self.segments += 1;
        Ok(())
    }

    pub fn push_event(&mut self, key: &PipeKey, event: &dyn PipeEvent) -> Result<()> {
        let mut body = BytesMut::new();
        event.encode_body(&mut body)?;
        self.push_payload(key, event.tag(), &body)
    }

    pub fn push_segment(&mut self, segment: &Segment) -> Result<()> {
        if let Segment::Payload { body, .. } = segment {
            self.check_size(body.len())?;
        }
        encode_segment(segment, &mut self.buf)?;
        self.segments += 1;
        Ok(())
    }

    /// Number of segments buffered since the last flush.
    pub fn pending_segments(&self) -> usize {
        self.segments
    }

    /// Buffered bytes not yet handed to the sender.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Send the buffered body. The buffer is kept on failure so the same
    /// bytes can be retried.
    pub fn flush(&mut self) -> Result<usize> {
        if self.buf.is_empty() {
            return Ok(0);
        }
        self.sender.send(&self.buf)?;
        let sent = self.segments;
        self.buf.clear();
        self.segments = 0;
        Ok(sent)
    }

    /// Drop buffered segments without sending them.
    pub fn discard(&mut self) {
        self.buf.clear();
        self.segments = 0;
    }

    pub fn get_ref(&self) -> &S {
        &self.sender
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.sender
    }

    pub fn into_inner(self) -> S {
        self.sender
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.config.max_payload_size,
            });
        }
        Ok(())
    }
}
