//! Nonces (challenges, verifiers, secrets) and digest values.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Random bytes used as a poll challenge, a vote verifier or a verifier's secret.
///
/// Challenges and verifiers seed every content digest so that a digest computed
/// for one poll cannot be replayed in another.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    /// Length in bytes of freshly generated nonces.
    pub const LEN: usize = 20;

    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TypesError> {
        hex::decode(s)
            .map(Self)
            .map_err(|e| TypesError::InvalidHex(e.to_string()))
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0.len().min(4);
        write!(f, "Nonce({})", hex::encode(&self.0[..n]))
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The output of a seeded content digest.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(Vec<u8>);

impl Digest {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.0.len().min(4);
        write!(f, "Digest({})", hex::encode(&self.0[..n]))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let n = Nonce::new(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(n.to_hex(), "deadbeef");
        assert_eq!(Nonce::from_hex("deadbeef").unwrap(), n);
    }

    #[test]
    fn bad_hex_is_rejected() {
        assert!(matches!(
            Nonce::from_hex("xyz"),
            Err(TypesError::InvalidHex(_))
        ));
    }

    #[test]
    fn debug_is_truncated() {
        let d = Digest::new(vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(format!("{d:?}"), "Digest(01020304)");
    }
}
