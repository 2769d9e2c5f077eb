//! Fundamental types for the content-audit poll protocol.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! peer identities, nonces and digests, poll keys, millisecond timestamps, and the
//! protocol-version / poll-kind tags.

pub mod error;
pub mod key;
pub mod nonce;
pub mod peer;
pub mod poll;
pub mod time;

pub use error::TypesError;
pub use key::PollKey;
pub use nonce::{Digest, Nonce};
pub use peer::PeerId;
pub use poll::{PollKind, ProtocolVersion};
pub use time::Timestamp;
