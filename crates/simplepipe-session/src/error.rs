use simplepipe_frame::PipeKey;

/// Errors that can occur in pipe session operations.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] simplepipe_transport::TransportError),

    /// Frame-level error (corrupt segment, unknown tag, invalid body).
    #[error("frame error: {0}")]
    Frame(#[from] simplepipe_frame::FrameError),

    /// The session already carries a key.
    #[error("session is already registered as {0}")]
    AlreadyRegistered(PipeKey),

    /// The session has no key.
    #[error("session is not registered")]
    Unregistered,

    /// No session is registered under the key.
    #[error("no pipe registered for key {0}")]
    UnknownKey(PipeKey),

    /// The session has no delivery buffer.
    #[error("pipe {0} has no delivery buffer")]
    NoBuffer(PipeKey),

    /// The application setup hook refused the pipe.
    #[error("pipe setup refused")]
    SetupFailed,

    /// The session is not a compound session.
    #[error("pipe {0} is not a compound session")]
    NotCompound(PipeKey),

    /// Every slot of a compound session is taken.
    #[error("all {0} compound slots are occupied")]
    SlotsFull(usize),

    /// The slot index is out of range or empty.
    #[error("compound slot {0} is not occupied")]
    InvalidSlot(usize),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A background thread could not be started.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipeError>;
