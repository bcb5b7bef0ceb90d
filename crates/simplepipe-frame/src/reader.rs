use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_segment, FrameConfig, Segment};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete segments from a response body stream.
///
/// Partial reads are buffered internally; callers only ever see whole segments.
pub struct SegmentReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> SegmentReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete segment (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` at EOF, whether or not a
    /// segment was cut short.
    pub fn read_segment(&mut self) -> Result<Segment> {
        match self.try_read_segment()? {
            Some(segment) => Ok(segment),
            None => Err(FrameError::ConnectionClosed),
        }
    }

    /// Like [`Self::read_segment`], but a clean EOF between segments yields
    /// `Ok(None)`.
    pub fn try_read_segment(&mut self) -> Result<Option<Segment>> {
        loop {
            if let Some(segment) = decode_segment(&mut self.buf, &self.config)? {
                return Ok(Some(segment));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Drain the stream, collecting every segment until a clean EOF.
    pub fn read_to_end(&mut self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        while let Some(segment) = self.try_read_segment()? {
            segments.push(segment);
        }
        Ok(segments)
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<T: Read> Iterator for SegmentReader<T> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_read_segment().transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::key::PipeKey;
    use crate::status::PipeStatus;

    fn key() -> PipeKey {
        "Zz00Yy".parse().unwrap()
    }

    #[test]
    fn reads_mixed_response_body() {
        let body = b"Zz00YyChat#2$hiZz00YySPS#7${\"s\":4}Zz00Yyo".to_vec();
        let mut reader = SegmentReader::new(Cursor::new(body));

        let segments = reader.read_to_end().unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::payload(key(), "Chat", &b"hi"[..]),
                Segment::payload(key(), "SPS", &b"{\"s\":4}"[..]),
                Segment::status(key(), PipeStatus::Ok),
            ]
        );
    }

    #[test]
    fn byte_at_a_time_stream() {
        let reader = Trickle {
            bytes: b"Zz00YyChat#5$helloZz00Yyd".to_vec(),
            pos: 0,
        };
        let segments: Vec<Segment> = SegmentReader::new(reader)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1], Segment::status(key(), PipeStatus::Destroyed));
    }

    #[test]
    fn eof_mid_segment_is_connection_closed() {
        let mut reader = SegmentReader::new(Cursor::new(b"Zz00YyChat#5$he".to_vec()));
        assert!(matches!(
            reader.read_segment(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn clean_eof_on_empty_body() {
        let mut reader = SegmentReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.try_read_segment().unwrap().is_none());
        assert!(matches!(
            reader.read_segment(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn corrupt_stream_surfaces_error() {
        let mut reader = SegmentReader::new(Cursor::new(b"Zz00Yy?".to_vec()));
        assert!(matches!(
            reader.read_segment(),
            Err(FrameError::InvalidTag(_))
        ));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedOnce {
            interrupted: false,
            inner: Cursor::new(b"Zz00Yyo".to_vec()),
        };
        let mut reader = SegmentReader::new(reader);
        assert_eq!(
            reader.read_segment().unwrap(),
            Segment::status(key(), PipeStatus::Ok)
        );
    }

    struct Trickle {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedOnce {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedOnce {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
