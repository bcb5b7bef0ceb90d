use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::codec::DEFAULT_MAX_TAG_LEN;
use crate::error::{FrameError, Result};
use crate::payload::{is_valid_tag, read_json, PipeEvent, PipeSequence, SEQUENCE_TAG};

type DecodeFn = dyn Fn(&[u8]) -> Result<Arc<dyn PipeEvent>> + Send + Sync;

/// Structural validation applied to a payload body before it is decoded.
pub trait BodyValidator: Send + Sync {
    /// Validate `body` for `tag`. Tags without a known shape should pass.
    fn validate_body(&self, tag: &str, body: &[u8]) -> Result<()>;
}

/// Maps wire tags to body decoders.
///
/// A fresh registry already knows the sequence acknowledgement (`SPS`).
pub struct PayloadRegistry {
    decoders: HashMap<String, Arc<DecodeFn>>,
    validator: Option<Arc<dyn BodyValidator>>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        let mut decoders: HashMap<String, Arc<DecodeFn>> = HashMap::new();
        decoders.insert(
            SEQUENCE_TAG.to_string(),
            Arc::new(|body: &[u8]| {
                PipeSequence::decode(body).map(|seq| Arc::new(seq) as Arc<dyn PipeEvent>)
            }),
        );
        Self {
            decoders,
            validator: None,
        }
    }

    /// Register a decoder for `tag`, replacing any previous one.
    pub fn register<F>(&mut self, tag: &str, decode: F) -> Result<()>
    where
        F: Fn(&[u8]) -> Result<Arc<dyn PipeEvent>> + Send + Sync + 'static,
    {
        if !is_valid_tag(tag, DEFAULT_MAX_TAG_LEN) {
            return Err(FrameError::InvalidTag(tag.to_string()));
        }
        if self.decoders.insert(tag.to_string(), Arc::new(decode)).is_some() {
            tracing::debug!(tag, "replaced payload decoder");
        }
        Ok(())
    }

    /// Register a JSON-bodied event type under `tag`.
    pub fn register_json<T>(&mut self, tag: &str) -> Result<()>
    where
        T: PipeEvent + for<'de> Deserialize<'de>,
    {
        let owned = tag.to_string();
        self.register(tag, move |body| {
            read_json::<T>(&owned, body).map(|event| Arc::new(event) as Arc<dyn PipeEvent>)
        })
    }

    /// Install a body validator consulted before every decode.
    pub fn set_validator(&mut self, validator: Arc<dyn BodyValidator>) {
        self.validator = Some(validator);
    }

    pub fn with_validator(mut self, validator: Arc<dyn BodyValidator>) -> Self {
        self.set_validator(validator);
        self
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Validate and decode one payload body.
    pub fn decode(&self, tag: &str, body: &[u8]) -> Result<Arc<dyn PipeEvent>> {
        let decoder = self
            .decoders
            .get(tag)
            .ok_or_else(|| FrameError::UnknownTag(tag.to_string()))?;
        if let Some(validator) = &self.validator {
            validator.validate_body(tag, body)?;
        }
        decoder(body)
    }
}

impl Default for PayloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadRegistry")
            .field("tags", &self.tags())
            .field("validating", &self.validator.is_some())
            .finish()
    }
}
