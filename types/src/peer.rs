//! Peer identity type.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// The identity of a cache participating in polls, e.g. `TCP:[10.0.0.1]:9729`.
///
/// Identities are opaque to the poll subsystem: they are compared, hashed and
/// handed to the identity collaborator, never interpreted.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Parse an identity string, rejecting blank input.
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(TypesError::InvalidPeerId(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_and_accepts() {
        let id = PeerId::parse("  TCP:[127.0.0.1]:9729 ").unwrap();
        assert_eq!(id.as_str(), "TCP:[127.0.0.1]:9729");
    }

    #[test]
    fn parse_rejects_blank_and_embedded_space() {
        assert!(PeerId::parse("   ").is_err());
        assert!(PeerId::parse("a b").is_err());
    }
}
