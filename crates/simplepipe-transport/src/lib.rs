//! Transport adapter contract for simplepipe push channels.
//!
//! The pipe engine never moves bytes itself. Streaming HTTP bodies, hidden-frame
//! polling, script-tag delivery and short-poll requests all plug in through the
//! narrow traits defined here:
//! - [`PipeSender`] hands serialized frames to the peer
//! - [`BytesSink`] receives bytes and reports how many were consumed
//! - [`RequestTransport`] performs one request/response round trip
//!
//! This is the lowest layer of simplepipe. Everything else builds on top of it.

pub mod error;
pub mod stream;
pub mod traits;

pub use error::{Result, TransportError};
pub use stream::{ChunkedReceiver, StreamSender};
pub use traits::{BytesSink, PipeSender, RequestTransport};
