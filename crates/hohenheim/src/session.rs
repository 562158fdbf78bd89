//! Per-session state
//!
//! Every session owns its own short-term memory and reasoning mode. Sessions
//! never see each other's state; they only share long-term memory.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::Result;
use crate::memory::ShortTermMemory;
use crate::reasoning::ReasoningMode;

const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionIdError {
    #[error("Session ID cannot be empty")]
    Empty,

    #[error("Session ID may only contain a-z, A-Z, 0-9, '_' and '-'")]
    InvalidChars,

    #[error("Session ID is longer than {MAX_SESSION_ID_LEN} characters")]
    TooLong,
}

/// Validated session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> std::result::Result<Self, SessionIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(SessionIdError::Empty);
        }
        if id.len() > MAX_SESSION_ID_LEN {
            return Err(SessionIdError::TooLong);
        }
        if !id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(SessionIdError::InvalidChars);
        }
        Ok(Self(id))
    }

    /// Fresh random id, for front-ends that do not name their sessions
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State owned by one conversation
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub short_term: ShortTermMemory,
    pub mode: ReasoningMode,
    pub started_at: DateTime<Utc>,
    /// Commands processed so far
    pub turns: u64,
    /// Set on exit; a closed session accepts no further commands
    pub closed: bool,
}

impl Session {
    pub fn new(id: SessionId, short_term_capacity: usize, mode: ReasoningMode) -> Result<Self> {
        Ok(Self {
            id,
            short_term: ShortTermMemory::new(short_term_capacity)?,
            mode,
            started_at: Utc::now(),
            turns: 0,
            closed: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        for id in ["a", "project-abc", "PROJECT_123", "a-b_c"] {
            assert!(SessionId::new(id).is_ok(), "{id} should be valid");
        }
        assert!(SessionId::new("x".repeat(MAX_SESSION_ID_LEN)).is_ok());
    }

    #[test]
    fn test_invalid_ids() {
        assert_eq!(SessionId::new(""), Err(SessionIdError::Empty));
        assert_eq!(SessionId::new("has spaces"), Err(SessionIdError::InvalidChars));
        assert_eq!(SessionId::new("café"), Err(SessionIdError::InvalidChars));
        assert_eq!(
            SessionId::new("x".repeat(MAX_SESSION_ID_LEN + 1)),
            Err(SessionIdError::TooLong)
        );
    }

    #[test]
    fn test_generated_ids_are_valid_and_distinct() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(SessionId::new(a.as_str()).is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let id: SessionId = serde_json::from_str("\"chat-1\"").unwrap();
        assert_eq!(id.as_str(), "chat-1");
        assert!(serde_json::from_str::<SessionId>("\"bad id\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"chat-1\"");
    }

    #[test]
    fn test_session_rejects_zero_capacity() {
        assert!(Session::new(SessionId::generate(), 0, ReasoningMode::default()).is_err());
    }
}
