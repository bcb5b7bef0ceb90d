/// Errors that can occur while moving pipe bytes.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An I/O error occurred on the underlying stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer answered with a non-success status.
    #[error("request rejected with status {0}")]
    Status(u16),

    /// The peer returned an empty response where data was required.
    #[error("empty response")]
    EmptyResponse,

    /// The stream was closed before the bytes could be written.
    #[error("connection closed")]
    Closed,

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
