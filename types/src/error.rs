//! Error type for parsing and validating the shared types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid peer identity: {0:?}")]
    InvalidPeerId(String),

    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("poll kind {kind} is not valid for protocol {version}")]
    KindVersionMismatch { kind: String, version: u8 },
}
