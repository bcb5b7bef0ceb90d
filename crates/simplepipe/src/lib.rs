//! Keyed server-to-client push pipes over request/response transports.
//!
//! A pipe is a session identified by a six-character key. The server side
//! buffers events per pipe and drains them into compact text segments
//! whenever the client's transport asks; the client side parses those
//! segments back into events and keeps the pipe alive with notifications.
//!
//! # Crate Structure
//!
//! - [`transport`]: the adapter contract transports implement
//! - [`frame`]: keys, statuses, payload events and the segment codec
//! - [`schema`]: optional JSON Schema validation of payload bodies (behind `schema` feature)
//! - [`session`]: sessions, registry, delivery buffers, liveness and reaping (behind `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use simplepipe_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use simplepipe_frame::*;
}

/// Re-export schema types (requires `schema` feature).
#[cfg(feature = "schema")]
pub mod schema {
    pub use simplepipe_schema::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use simplepipe_session::*;
}
