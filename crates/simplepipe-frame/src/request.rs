use std::fmt;
use std::str::FromStr;

use crate::error::{FrameError, Result};
use crate::key::PipeKey;

/// Form field carrying the pipe key.
pub const FIELD_KEY: char = 'k';
/// Form field carrying the request type.
pub const FIELD_TYPE: char = 't';
/// Form field carrying the client's pipe sequence.
pub const FIELD_SEQUENCE: char = 's';
/// Form field carrying the per-pipe request counter (replay guard hash).
pub const FIELD_COUNTER: char = 'r';
/// Optional form field naming the subdomain for cross-domain transports.
pub const FIELD_DOMAIN: char = 'd';

/// What the client wants from the pipe endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Short poll for buffered data.
    Query,
    /// Short poll through a subdomain frame.
    SubdomainQuery,
    /// Keep-alive notification carrying the acknowledged sequence.
    Notify,
    /// Script-tag delivery.
    Script,
    /// Cross-site script delivery.
    CrossSite,
    /// Long-lived streaming response.
    Continuum,
}

impl RequestType {
    pub const fn as_char(self) -> char {
        match self {
            Self::Query => 'q',
            Self::SubdomainQuery => 'u',
            Self::Notify => 'n',
            Self::Script => 's',
            Self::CrossSite => 'x',
            Self::Continuum => 'c',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'q' => Some(Self::Query),
            'u' => Some(Self::SubdomainQuery),
            'n' => Some(Self::Notify),
            's' => Some(Self::Script),
            'x' => Some(Self::CrossSite),
            'c' => Some(Self::Continuum),
            _ => None,
        }
    }

    /// Whether this request expects buffered data in the answer.
    pub fn delivers_data(self) -> bool {
        !matches!(self, Self::Notify)
    }
}

/// The query string a client sends to the pipe endpoint:
/// `k=<key>&t=<type>&s=<sequence>&r=<counter>[&d=<domain>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeRequest {
    pub key: PipeKey,
    pub kind: RequestType,
    pub sequence: u64,
    pub counter: u64,
    pub domain: Option<String>,
}

impl PipeRequest {
    pub fn new(key: PipeKey, kind: RequestType, sequence: u64, counter: u64) -> Self {
        Self {
            key,
            kind,
            sequence,
            counter,
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse a request form. Unknown fields are ignored; `s` and `r` default
    /// to zero when absent.
    pub fn parse(form: &str) -> Result<Self> {
        let mut key = None;
        let mut kind = None;
        let mut sequence = 0u64;
        let mut counter = 0u64;
        let mut domain = None;

        for pair in form.split('&').filter(|pair| !pair.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| FrameError::InvalidRequest(format!("field without value: {pair}")))?;
            let mut chars = name.chars();
            let field = match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => continue,
            };
            match field {
                FIELD_KEY => key = Some(value.parse::<PipeKey>()?),
                FIELD_TYPE => {
                    let mut type_chars = value.chars();
                    kind = match (type_chars.next(), type_chars.next()) {
                        (Some(c), None) => RequestType::from_char(c),
                        _ => None,
                    };
                    if kind.is_none() {
                        return Err(FrameError::InvalidRequest(format!(
                            "unknown request type {value:?}"
                        )));
                    }
                }
                FIELD_SEQUENCE => sequence = parse_number(FIELD_SEQUENCE, value)?,
                FIELD_COUNTER => counter = parse_number(FIELD_COUNTER, value)?,
                FIELD_DOMAIN => domain = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(Self {
            key: key.ok_or_else(|| FrameError::InvalidRequest("missing pipe key".to_string()))?,
            kind: kind
                .ok_or_else(|| FrameError::InvalidRequest("missing request type".to_string()))?,
            sequence,
            counter,
            domain,
        })
    }
}

impl fmt::Display for PipeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{FIELD_KEY}={}&{FIELD_TYPE}={}&{FIELD_SEQUENCE}={}&{FIELD_COUNTER}={}",
            self.key,
            self.kind.as_char(),
            self.sequence,
            self.counter
        )?;
        if let Some(domain) = &self.domain {
            write!(f, "&{FIELD_DOMAIN}={domain}")?;
        }
        Ok(())
    }
}

impl FromStr for PipeRequest {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_number(field: char, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| FrameError::InvalidRequest(format!("field {field} is not a number: {value:?}")))
}
