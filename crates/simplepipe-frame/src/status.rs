//! Single-byte segment statuses.
//!
//! A segment that carries one of these bytes right after the key has no
//! payload. Any other byte in that position starts a payload tag.

/// Heartbeat: the pipe is alive, nothing else to say.
pub const OK: u8 = b'o';

/// The pipe was destroyed on the sending side. Terminal.
pub const DESTROYED: u8 = b'd';

/// Transport-specific pipeline restart signal.
pub const CONTINUE: u8 = b'e';

/// The peer gave up on the pipe.
pub const LOST: u8 = b'l';

/// Decoded status of a payload-less segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeStatus {
    Ok,
    Destroyed,
    Continue,
    Lost,
}

impl PipeStatus {
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Ok => OK,
            Self::Destroyed => DESTROYED,
            Self::Continue => CONTINUE,
            Self::Lost => LOST,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            OK => Some(Self::Ok),
            DESTROYED => Some(Self::Destroyed),
            CONTINUE => Some(Self::Continue),
            LOST => Some(Self::Lost),
            _ => None,
        }
    }

    /// Human-readable name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Destroyed => "DESTROYED",
            Self::Continue => "CONTINUE",
            Self::Lost => "LOST",
        }
    }

    /// Returns true if no further segments are expected for the key.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed | Self::Lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_mapping_is_bijective() {
        for status in [
            PipeStatus::Ok,
            PipeStatus::Destroyed,
            PipeStatus::Continue,
            PipeStatus::Lost,
        ] {
            assert_eq!(PipeStatus::from_byte(status.as_byte()), Some(status));
        }
        assert_eq!(PipeStatus::from_byte(b'S'), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(PipeStatus::Destroyed.is_terminal());
        assert!(PipeStatus::Lost.is_terminal());
        assert!(!PipeStatus::Ok.is_terminal());
        assert_eq!(PipeStatus::Continue.name(), "CONTINUE");
    }
}
