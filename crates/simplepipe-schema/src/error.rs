/// Errors that can occur while loading schemas or validating bodies.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A schema file or directory could not be read.
    #[error("failed to load schema: {0}")]
    LoadFailed(String),

    /// The schema is not a valid JSON Schema.
    #[error("failed to compile schema for tag {tag:?}: {message}")]
    CompileFailed { tag: String, message: String },

    /// The tag cannot appear on the wire.
    #[error("invalid payload tag {0:?}")]
    InvalidTag(String),

    /// The body does not satisfy the schema registered for its tag.
    #[error("body for tag {tag:?} failed validation: {message}")]
    ValidationFailed { tag: String, message: String },

    /// The body or schema is not valid JSON.
    #[error("not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// No schema is registered for the tag (strict registries only).
    #[error("no schema registered for tag {0:?}")]
    NoSchema(String),
}

pub type Result<T> = std::result::Result<T, SchemaError>;

impl From<SchemaError> for simplepipe_frame::FrameError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::ValidationFailed { tag, message } => Self::Validation { tag, message },
            SchemaError::NoSchema(tag) => Self::Validation {
                message: "no schema registered".to_string(),
                tag,
            },
            other => Self::Validation {
                tag: String::new(),
                message: other.to_string(),
            },
        }
    }
}
