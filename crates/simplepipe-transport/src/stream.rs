use std::io::{ErrorKind, Read, Write};

use bytes::{Buf, BytesMut};

use crate::error::{Result, TransportError};
use crate::traits::{BytesSink, PipeSender};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// A [`PipeSender`] over any `Write` stream (streaming response body, socket).
///
/// The stream must be blocking: `WouldBlock` is reported as
/// [`TransportError::Io`] instead of being retried.
pub struct StreamSender<W> {
    inner: W,
}

impl<W: Write> StreamSender<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Consume the sender and return the inner stream.
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

impl<W: Write> PipeSender for StreamSender<W> {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        self.flush()
    }
}

/// Accumulates received chunks and feeds them to a [`BytesSink`].
///
/// Bytes the sink does not consume (a segment cut mid-payload) are kept and
/// prepended to the next chunk, so callers can push chunks of any size.
pub struct ChunkedReceiver<S> {
    sink: S,
    pending: BytesMut,
}

impl<S: BytesSink> ChunkedReceiver<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            pending: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Append a chunk and let the sink consume what it can.
    ///
    /// Returns the number of bytes consumed by this call (which may include
    /// bytes left over from earlier chunks).
    pub fn receive(&mut self, chunk: &[u8]) -> std::result::Result<usize, S::Error> {
        self.pending.extend_from_slice(chunk);
        let consumed = self.sink.on_bytes_received(&self.pending)?;
        let consumed = consumed.min(self.pending.len());
        self.pending.advance(consumed);
        Ok(consumed)
    }

    /// Read `reader` to EOF, feeding every chunk to the sink.
    ///
    /// Returns the total number of bytes consumed.
    pub fn pump<R: Read>(&mut self, reader: &mut R) -> std::result::Result<usize, S::Error> {
        let mut total = 0usize;
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err).into()),
            };

            if read == 0 {
                if !self.pending.is_empty() {
                    tracing::debug!(
                        unparsed = self.pending.len(),
                        "stream ended with an incomplete segment"
                    );
                }
                return Ok(total);
            }

            total += self.receive(&chunk[..read])?;
        }
    }

    /// Bytes received but not yet consumed by the sink.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Borrow the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutably borrow the sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consume the receiver and return the sink.
    pub fn into_inner(self) -> S {
        self.sink
    }
}
