//! Deferred-job token carried through the chat host as callback data.
//!
//! Wire format (v1):
//!
//! ```text
//! _yt1|<aud|vid>|<sourceID>|<formatID>|<expectedSizeBytes>|<originMessageID>|<requesterUserID>
//! ```
//!
//! Parsing is strict: wrong tag, field count, empty ids, non-numeric sizes
//! or an over-long token are rejected before any work is done.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Tag identifying a v1 token. Callback data starting with `_yt` is ours.
pub const TOKEN_TAG: &str = "_yt1";
pub const TOKEN_PREFIX: &str = "_yt";

/// Hard limit the chat host puts on callback data.
pub const MAX_TOKEN_BYTES: usize = 64;

const FIELD_COUNT: usize = 7;
const SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("unknown token tag {0:?}")]
    UnknownTag(String),
    #[error("expected 7 fields, got {0}")]
    FieldCount(usize),
    #[error("unknown action {0:?}")]
    UnknownAction(String),
    #[error("field {field} is empty or malformed: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("token is {0} bytes, limit is 64")]
    TooLong(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobAction {
    FetchAudio,
    FetchVideo,
}

impl JobAction {
    fn wire(&self) -> &'static str {
        match self {
            Self::FetchAudio => "aud",
            Self::FetchVideo => "vid",
        }
    }
}

impl FromStr for JobAction {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aud" => Ok(Self::FetchAudio),
            "vid" => Ok(Self::FetchVideo),
            other => Err(TokenError::UnknownAction(other.to_string())),
        }
    }
}

/// A download the user can trigger later by pressing a button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredJob {
    pub action: JobAction,
    pub source_id: String,
    pub format_id: String,
    pub expected_size_bytes: u64,
    pub origin_message_id: i32,
    pub requester_user_id: i64,
}

impl DeferredJob {
    /// Encode for the wire, refusing tokens the host would truncate.
    pub fn encode(&self) -> Result<String, TokenError> {
        validate_id("sourceID", &self.source_id)?;
        validate_id("formatID", &self.format_id)?;
        let token = self.to_string();
        if token.len() > MAX_TOKEN_BYTES {
            return Err(TokenError::TooLong(token.len()));
        }
        Ok(token)
    }

    /// Whether callback data looks like one of our tokens (any version).
    pub fn is_token(data: &str) -> bool {
        data.starts_with(TOKEN_PREFIX)
    }
}

impl fmt::Display for DeferredJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{TOKEN_TAG}|{}|{}|{}|{}|{}|{}",
            self.action.wire(),
            self.source_id,
            self.format_id,
            self.expected_size_bytes,
            self.origin_message_id,
            self.requester_user_id
        )
    }
}

impl FromStr for DeferredJob {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > MAX_TOKEN_BYTES {
            return Err(TokenError::TooLong(s.len()));
        }

        let fields: Vec<&str> = s.split(SEPARATOR).collect();
        if fields[0] != TOKEN_TAG {
            return Err(TokenError::UnknownTag(fields[0].to_string()));
        }
        if fields.len() != FIELD_COUNT {
            return Err(TokenError::FieldCount(fields.len()));
        }

        Ok(Self {
            action: fields[1].parse()?,
            source_id: validate_id("sourceID", fields[2])?.to_string(),
            format_id: validate_id("formatID", fields[3])?.to_string(),
            expected_size_bytes: parse_number("expectedSizeBytes", fields[4])?,
            origin_message_id: parse_number("originMessageID", fields[5])?,
            requester_user_id: parse_number("requesterUserID", fields[6])?,
        })
    }
}

fn validate_id<'a>(field: &'static str, value: &'a str) -> Result<&'a str, TokenError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(value)
    } else {
        Err(TokenError::InvalidField {
            field,
            value: value.to_string(),
        })
    }
}

fn parse_number<T: FromStr>(field: &'static str, value: &str) -> Result<T, TokenError> {
    value.parse().map_err(|_| TokenError::InvalidField {
        field,
        value: value.to_string(),
    })
}
