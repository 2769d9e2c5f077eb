//! Nonce generation and verifier derivation.

use lcap_types::Nonce;
use rand::RngCore;

use crate::hash::blake2b_256;

/// Fill a fresh [`Nonce::LEN`]-byte nonce from the given RNG.
pub fn generate_nonce<R: RngCore + ?Sized>(rng: &mut R) -> Nonce {
    let mut bytes = vec![0u8; Nonce::LEN];
    rng.fill_bytes(&mut bytes);
    Nonce::new(bytes)
}

/// A nonce from the thread-local RNG.
pub fn random_nonce() -> Nonce {
    generate_nonce(&mut rand::thread_rng())
}

/// The public verifier corresponding to a private secret.
///
/// Only the holder of the secret can later prove it produced the verifier,
/// which is what a verify poll checks.
pub fn verifier_for_secret(secret: &Nonce) -> Nonce {
    let hash = blake2b_256(secret.as_bytes());
    Nonce::new(hash[..Nonce::LEN].to_vec())
}
