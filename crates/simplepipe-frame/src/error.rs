/// Errors that can occur while encoding or decoding pipe segments.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A pipe key is not exactly six ASCII alphanumerics.
    #[error("invalid pipe key {0:?}")]
    InvalidKey(String),

    /// A payload tag is empty, too long, or uses characters outside `[A-Za-z0-9._]`.
    #[error("invalid payload tag {0:?}")]
    InvalidTag(String),

    /// The decimal length field of a payload segment is malformed.
    #[error("malformed payload length field")]
    InvalidLength,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// No decoder is registered for a payload tag.
    #[error("unknown payload tag {0:?}")]
    UnknownTag(String),

    /// A payload body could not be (de)serialized.
    #[error("payload body for tag {tag:?} is invalid: {source}")]
    Body {
        tag: String,
        #[source]
        source: serde_json::Error,
    },

    /// A payload body failed structural validation.
    #[error("payload body for tag {tag:?} failed validation: {message}")]
    Validation { tag: String, message: String },

    /// A pipe request form could not be parsed.
    #[error("invalid pipe request: {0}")]
    InvalidRequest(String),

    /// A transport error surfaced while writing segments.
    #[error(transparent)]
    Transport(#[from] simplepipe_transport::TransportError),

    /// An I/O error occurred while reading segments.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a complete segment was received.
    #[error("connection closed (incomplete segment)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
