use bytes::Bytes;

use crate::error::{Result, TransportError};

/// Outbound half of a transport adapter.
///
/// A successful return means the bytes were handed off to the peer; the pipe
/// engine only advances its "last flushed" marker after that.
pub trait PipeSender {
    /// Send one serialized response body (or body chunk).
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

impl<T: PipeSender + ?Sized> PipeSender for &mut T {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).send(bytes)
    }
}

impl<T: PipeSender + ?Sized> PipeSender for Box<T> {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).send(bytes)
    }
}

/// Inbound half of a transport adapter.
///
/// Implementors parse as much of `bytes` as forms complete segments and return
/// the number of bytes consumed. Unconsumed bytes are offered again, prefixed
/// to the next chunk, by [`crate::ChunkedReceiver`].
pub trait BytesSink {
    /// Error raised when the received bytes are corrupt.
    type Error: From<TransportError>;

    /// Consume bytes, returning how many were fully parsed.
    fn on_bytes_received(&mut self, bytes: &[u8]) -> std::result::Result<usize, Self::Error>;
}

impl<T: BytesSink + ?Sized> BytesSink for &mut T {
    type Error = T::Error;

    fn on_bytes_received(&mut self, bytes: &[u8]) -> std::result::Result<usize, Self::Error> {
        (**self).on_bytes_received(bytes)
    }
}

/// A single request/response exchange (short-poll query, notify request).
pub trait RequestTransport: Send {
    /// Send a request body and wait for the complete response body.
    fn request(&mut self, body: &[u8]) -> Result<Bytes>;
}

impl<F> RequestTransport for F
where
    F: FnMut(&[u8]) -> Result<Bytes> + Send,
{
    fn request(&mut self, body: &[u8]) -> Result<Bytes> {
        self(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Vec<Vec<u8>>);

    impl PipeSender for Recorder {
        fn send(&mut self, bytes: &[u8]) -> Result<()> {
            self.0.push(bytes.to_vec());
            Ok(())
        }
    }

    fn send_heartbeat<S: PipeSender>(mut sender: S) -> Result<()> {
        sender.send(b"Ab12Cdo")
    }

    #[test]
    fn sender_through_mut_reference() {
        let mut recorder = Recorder(Vec::new());
        send_heartbeat(&mut recorder).unwrap();
        send_heartbeat(Box::new(&mut recorder)).unwrap();
        assert_eq!(recorder.0, vec![b"Ab12Cdo".to_vec(), b"Ab12Cdo".to_vec()]);
    }

    #[test]
    fn closure_is_request_transport() {
        let mut transport = |body: &[u8]| -> Result<Bytes> {
            assert_eq!(body, b"k=Ab12Cd&t=q&s=1&r=1");
            Ok(Bytes::from_static(b"Ab12Cdo"))
        };
        let response = transport.request(b"k=Ab12Cd&t=q&s=1&r=1").unwrap();
        assert_eq!(response.as_ref(), b"Ab12Cdo");
    }

    #[test]
    fn closure_can_report_status() {
        let mut transport = |_: &[u8]| -> Result<Bytes> { Err(TransportError::Status(502)) };
        assert!(matches!(
            transport.request(b""),
            Err(TransportError::Status(502))
        ));
    }
}
