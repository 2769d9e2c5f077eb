//! Nullable random: seeded generators so every run draws the same values.

use std::cell::Cell;

use lcap_crypto::generate_nonce;
use lcap_types::Nonce;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Hands out seeded [`StdRng`]s, each with the next seed in sequence.
///
/// A simulation gives every node its own generator from one `NullRandom`, so
/// node behaviour is deterministic but not identical across nodes.
pub struct NullRandom {
    next_seed: Cell<u64>,
}

impl NullRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            next_seed: Cell::new(seed),
        }
    }

    pub fn rng(&self) -> StdRng {
        let seed = self.next_seed.get();
        self.next_seed.set(seed.wrapping_add(1));
        StdRng::seed_from_u64(seed)
    }

    /// A nonce drawn from a fresh generator.
    pub fn nonce(&self) -> Nonce {
        generate_nonce(&mut self.rng())
    }
}

impl Default for NullRandom {
    fn default() -> Self {
        Self::new(0)
    }
}
