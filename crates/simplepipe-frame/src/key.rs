use std::fmt;
use std::str::FromStr;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{FrameError, Result};

/// Length of every pipe key on the wire.
pub const KEY_LENGTH: usize = 6;

/// Six-character session identifier drawn from `[0-9a-zA-Z]`.
///
/// Keys are unguessable enough to avoid accidental collisions, nothing more.
/// Uniqueness is enforced by the session registry at registration time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeKey([u8; KEY_LENGTH]);

impl PipeKey {
    /// Draw a fresh key from the thread-local RNG.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Draw a fresh key from the given RNG.
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        for slot in bytes.iter_mut() {
            *slot = rng.sample(Alphanumeric);
        }
        Self(bytes)
    }

    /// Build a key from raw wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LENGTH || !bytes.iter().all(u8::is_ascii_alphanumeric) {
            return Err(FrameError::InvalidKey(
                String::from_utf8_lossy(bytes).into_owned(),
            ));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Constructors only admit ASCII alphanumerics.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for PipeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for PipeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipeKey({})", self.as_str())
    }
}

impl FromStr for PipeKey {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_bytes(s.as_bytes())
    }
}

impl TryFrom<&str> for PipeKey {
    type Error = FrameError;

    fn try_from(value: &str) -> Result<Self> {
        value.parse()
    }
}

impl serde::Serialize for PipeKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for PipeKey {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
