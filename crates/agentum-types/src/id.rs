use crate::{Error, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static SESSION_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{8}_\d{6}_[a-f0-9]{8}$").expect("session id regex is valid"));

/// Session identifier of the form `YYYYMMDD_HHMMSS_<8 hex chars>`.
///
/// Human-sortable, URL-safe, and path-safe. Construction always validates
/// against the strict format so an id can be joined onto the sessions root
/// without further checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh id from the current UTC time and a random suffix.
    pub fn generate() -> Self {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix: u32 = rand::random();
        Self(format!("{}_{:08x}", stamp, suffix))
    }

    /// Parse and validate an id. Anything that does not match the exact
    /// format is rejected before it can reach a filesystem join.
    pub fn parse(raw: &str) -> Result<Self> {
        if SESSION_ID_RE.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::InvalidSessionId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        SessionId::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_matches_format() {
        let id = SessionId::generate();
        assert!(SESSION_ID_RE.is_match(id.as_str()));
    }

    #[test]
    fn test_parse_valid() {
        let id = SessionId::parse("20260105_123456_deadbeef").unwrap();
        assert_eq!(id.as_str(), "20260105_123456_deadbeef");
    }

    #[test]
    fn test_parse_rejects_traversal() {
        assert!(SessionId::parse("../etc/passwd").is_err());
        assert!(SessionId::parse("20260105_123456_deadbeef/..").is_err());
        assert!(SessionId::parse("20260105_123456_DEADBEEF").is_err());
        assert!(SessionId::parse("20260105-123456-deadbeef").is_err());
        assert!(SessionId::parse("").is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let id = SessionId::parse("20260105_123456_deadbeef").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"20260105_123456_deadbeef\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_serde_rejects_invalid() {
        let result: std::result::Result<SessionId, _> = serde_json::from_str("\"nope\"");
        assert!(result.is_err());
    }
}
