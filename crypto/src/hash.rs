//! Pluggable, seeded content digests.
//!
//! The poll protocol never fixes a digest algorithm: peers name the algorithm in
//! every poll request and look it up with [`algorithm_by_name`].

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest as DigestTrait};
use lcap_types::{Digest, Nonce};
use sha2::Sha256;

use crate::CryptoError;

type Blake2b256 = Blake2b<U32>;

/// Name of the algorithm used when a request does not specify one.
pub const DEFAULT_ALGORITHM: &str = Blake2b256Algorithm::NAME;

/// An incremental digest computation over streamed content.
pub trait ContentHasher: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Digest;
}

/// A digest algorithm that can start new incremental computations.
pub trait DigestAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    fn hasher(&self) -> Box<dyn ContentHasher>;

    /// One-shot digest of a byte slice.
    fn digest(&self, data: &[u8]) -> Digest {
        let mut h = self.hasher();
        h.update(data);
        h.finalize()
    }
}

struct DigestHasher<D>(D);

impl<D: DigestTrait + Send> ContentHasher for DigestHasher<D> {
    fn update(&mut self, data: &[u8]) {
        DigestTrait::update(&mut self.0, data);
    }

    fn finalize(self: Box<Self>) -> Digest {
        Digest::new(self.0.finalize().to_vec())
    }
}

/// Blake2b with a 256-bit output.
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake2b256Algorithm;

impl Blake2b256Algorithm {
    pub const NAME: &'static str = "BLAKE2b-256";
}

impl DigestAlgorithm for Blake2b256Algorithm {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn hasher(&self) -> Box<dyn ContentHasher> {
        Box::new(DigestHasher(Blake2b256::new()))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Algorithm;

impl Sha256Algorithm {
    pub const NAME: &'static str = "SHA-256";
}

impl DigestAlgorithm for Sha256Algorithm {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn hasher(&self) -> Box<dyn ContentHasher> {
        Box::new(DigestHasher(Sha256::new()))
    }
}

static BLAKE2B_256: Blake2b256Algorithm = Blake2b256Algorithm;
static SHA_256: Sha256Algorithm = Sha256Algorithm;

/// Look up a digest algorithm by the name carried in poll messages.
pub fn algorithm_by_name(name: &str) -> Result<&'static dyn DigestAlgorithm, CryptoError> {
    match name {
        Blake2b256Algorithm::NAME => Ok(&BLAKE2B_256),
        Sha256Algorithm::NAME => Ok(&SHA_256),
        other => Err(CryptoError::UnknownAlgorithm(other.to_string())),
    }
}

/// Start a digest pre-seeded with `challenge` then `verifier`.
///
/// Content fed afterwards yields a digest that is only meaningful for this
/// (challenge, verifier) pair.
pub fn seeded_hasher(
    algorithm: &dyn DigestAlgorithm,
    challenge: &Nonce,
    verifier: &Nonce,
) -> Box<dyn ContentHasher> {
    let mut hasher = algorithm.hasher();
    hasher.update(challenge.as_bytes());
    hasher.update(verifier.as_bytes());
    hasher
}

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    DigestTrait::update(&mut hasher, data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hash multiple byte slices in sequence (avoids concatenation allocation).
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        DigestTrait::update(&mut hasher, part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake2b_deterministic() {
        assert_eq!(blake2b_256(b"hello audit"), blake2b_256(b"hello audit"));
        assert_ne!(blake2b_256(b"hello"), blake2b_256(b"world"));
    }

    #[test]
    fn blake2b_multi_equivalent() {
        let single = blake2b_256(b"helloworld");
        let multi = blake2b_256_multi(&[b"hello", b"world"]);
        assert_eq!(single, multi);
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(algorithm_by_name("SHA-256").unwrap().name(), "SHA-256");
        assert_eq!(
            algorithm_by_name(DEFAULT_ALGORITHM).unwrap().name(),
            "BLAKE2b-256"
        );
        assert!(matches!(
            algorithm_by_name("MD5"),
            Err(CryptoError::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn algorithm_output_sizes() {
        assert_eq!(Blake2b256Algorithm.digest(b"x").len(), 32);
        assert_eq!(Sha256Algorithm.digest(b"x").len(), 32);
        assert_ne!(Blake2b256Algorithm.digest(b"x"), Sha256Algorithm.digest(b"x"));
    }

    #[test]
    fn seeded_digest_depends_on_both_nonces() {
        let alg = Blake2b256Algorithm;
        let c1 = Nonce::new(vec![1; 20]);
        let c2 = Nonce::new(vec![2; 20]);
        let v = Nonce::new(vec![9; 20]);

        let run = |c: &Nonce, v: &Nonce| {
            let mut h = seeded_hasher(&alg, c, v);
            h.update(b"content");
            h.finalize()
        };

        assert_eq!(run(&c1, &v), run(&c1, &v));
        assert_ne!(run(&c1, &v), run(&c2, &v));
        assert_ne!(run(&c1, &v), run(&v, &c1));
    }

    #[test]
    fn seeded_equals_prefix_concatenation() {
        let alg = Sha256Algorithm;
        let c = Nonce::new(b"chal".to_vec());
        let v = Nonce::new(b"veri".to_vec());
        let mut h = seeded_hasher(&alg, &c, &v);
        h.update(b"body");
        assert_eq!(h.finalize(), alg.digest(b"chalveribody"));
    }
}
