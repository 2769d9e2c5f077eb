//! Poll key type.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Nonce;

/// Unique key of a poll, derived from the poll's challenge nonce.
///
/// Every peer participating in the same poll derives the same key from the
/// challenge carried in the poll request, which makes lookup by key idempotent.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PollKey(String);

impl PollKey {
    pub fn from_challenge(challenge: &Nonce) -> Self {
        Self(challenge.to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PollKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        let n = self.0.len().min(12);
        write!(f, "{}", &self.0[..n])
    }
}
