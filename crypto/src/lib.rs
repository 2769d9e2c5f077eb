//! Cryptographic primitives for content audits.
//!
//! - **Pluggable digests**: [`DigestAlgorithm`] with Blake2b-256 (default) and SHA-256
//!   implementations. Every content digest is pre-seeded with a poll's challenge and
//!   a voter's verifier via [`seeded_hasher`].
//! - **Nonces**: random challenges and secrets, and the verifier derived from a secret
//!   (`verifier = digest(secret)`).

pub mod error;
pub mod hash;
pub mod nonce;

pub use error::CryptoError;
pub use hash::{
    algorithm_by_name, blake2b_256, blake2b_256_multi, seeded_hasher, Blake2b256Algorithm,
    ContentHasher, DigestAlgorithm, Sha256Algorithm, DEFAULT_ALGORITHM,
};
pub use nonce::{generate_nonce, random_nonce, verifier_for_secret};
