//! Opaque session token shared by the broker and its clients.
//!
//! A token identifies one unit of background import work. It is
//! deliberately opaque: the server issues UUID-shaped tokens, clients
//! that cannot reach the server mint `local-` prefixed fallbacks, and
//! both are equally valid. The only rejected values are the empty string
//! and the literal placeholders browsers persist when a value was never
//! set.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Literal values that stand in for "no token" in persisted storage.
pub const PLACEHOLDER_TOKENS: [&str; 2] = ["null", "undefined"];

/// Prefix carried by tokens generated client-side in degraded mode.
pub const LOCAL_TOKEN_PREFIX: &str = "local-";

/// Reasons a raw string is not a usable session token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The token was empty or whitespace only.
    #[error("session token is empty")]
    Empty,

    /// The token is a persisted placeholder such as `"null"`.
    #[error("session token is a placeholder: {0:?}")]
    Placeholder(String),
}

/// A validated, non-empty session token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionToken(String);

impl SessionToken {
    /// Validate a raw token string.
    ///
    /// Surrounding whitespace is trimmed before validation.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TokenError::Empty);
        }
        if PLACEHOLDER_TOKENS.contains(&trimmed) {
            return Err(TokenError::Placeholder(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns `true` if `raw` would parse into a token.
    pub fn is_usable(raw: &str) -> bool {
        Self::parse(raw).is_ok()
    }

    /// Issue a fresh server-side token.
    pub fn issue() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Generate a random client-side token for degraded mode.
    pub fn local_fallback() -> Self {
        Self(format!("{LOCAL_TOKEN_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// Whether this token was minted locally rather than by the server.
    pub fn is_local_fallback(&self) -> bool {
        self.0.starts_with(LOCAL_TOKEN_PREFIX)
    }

    /// Borrow the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionToken {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionToken {
    type Error = TokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionToken> for String {
    fn from(token: SessionToken) -> Self {
        token.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_whitespace() {
        assert_eq!(SessionToken::parse(""), Err(TokenError::Empty));
        assert_eq!(SessionToken::parse("   "), Err(TokenError::Empty));
    }

    #[test]
    fn rejects_placeholders() {
        assert!(matches!(
            SessionToken::parse("null"),
            Err(TokenError::Placeholder(_))
        ));
        assert!(matches!(
            SessionToken::parse("undefined"),
            Err(TokenError::Placeholder(_))
        ));
    }

    #[test]
    fn accepts_opaque_values() {
        let token = SessionToken::parse(" abc123 ").ok();
        assert_eq!(token.as_ref().map(SessionToken::as_str), Some("abc123"));
        assert!(SessionToken::is_usable("nullable"));
    }

    #[test]
    fn fallback_tokens_are_valid_and_distinct() {
        let a = SessionToken::local_fallback();
        let b = SessionToken::local_fallback();
        assert_ne!(a, b);
        assert!(a.is_local_fallback());
        assert!(SessionToken::is_usable(a.as_str()));
        assert!(!SessionToken::issue().is_local_fallback());
    }

    #[test]
    fn deserialize_validates() {
        let ok: Result<SessionToken, _> = serde_json::from_str("\"abc\"");
        assert!(ok.is_ok());
        let bad: Result<SessionToken, _> = serde_json::from_str("\"undefined\"");
        assert!(bad.is_err());
    }
}
