//! Protocol-version and poll-kind tags.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Protocol generation a poll belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Symmetric multi-round polls (name / content / verify).
    V1,
    /// Poller/voter role polls with an explicit handshake.
    V3,
}

impl ProtocolVersion {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V3 => 3,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self, TypesError> {
        match v {
            1 => Ok(Self::V1),
            3 => Ok(Self::V3),
            other => Err(TypesError::UnsupportedVersion(other)),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.as_u8())
    }
}

/// What a poll audits (V1) or which side of the handshake this node plays (V3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PollKind {
    /// Compare directory listings.
    Name,
    /// Compare content digests.
    Content,
    /// Audit a single prior vote by asking its voter for the verifier's secret.
    Verify,
    /// V3 poll called by this node.
    Poller,
    /// V3 poll this node was invited into.
    Voter,
}

impl PollKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Content => "Content",
            Self::Verify => "Verify",
            Self::Poller => "Poller",
            Self::Voter => "Voter",
        }
    }

    /// The protocol generation this kind belongs to.
    pub fn version(&self) -> ProtocolVersion {
        match self {
            Self::Name | Self::Content | Self::Verify => ProtocolVersion::V1,
            Self::Poller | Self::Voter => ProtocolVersion::V3,
        }
    }

    /// Check that a `(version, kind)` tag is a real combination.
    pub fn check_version(&self, version: ProtocolVersion) -> Result<(), TypesError> {
        if self.version() == version {
            Ok(())
        } else {
            Err(TypesError::KindVersionMismatch {
                kind: self.as_str().to_string(),
                version: version.as_u8(),
            })
        }
    }

    pub fn is_verify(&self) -> bool {
        matches!(self, Self::Verify)
    }
}

impl fmt::Display for PollKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_round_trip() {
        assert_eq!(ProtocolVersion::from_u8(1).unwrap(), ProtocolVersion::V1);
        assert_eq!(ProtocolVersion::from_u8(3).unwrap(), ProtocolVersion::V3);
        assert_eq!(
            ProtocolVersion::from_u8(2),
            Err(TypesError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn kind_version_pairs() {
        assert!(PollKind::Name.check_version(ProtocolVersion::V1).is_ok());
        assert!(PollKind::Voter.check_version(ProtocolVersion::V3).is_ok());
        assert!(PollKind::Content.check_version(ProtocolVersion::V3).is_err());
    }
}
