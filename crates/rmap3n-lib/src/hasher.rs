//! Deterministic hasher for feature-table slot addressing using ahash.
//!
//! This uses AHasher with explicit seeds so that table layout is
//! reproducible across runs. The hash implementation can be swapped later
//! without changing callers.

use ahash::RandomState;
use std::hash::{BuildHasher, Hasher};

/// A deterministic hasher with a seeded state
#[derive(Clone)]
pub struct DeterministicHasher {
    seed: u64,
    state: RandomState,
}

impl DeterministicHasher {
    /// Create a new deterministic hasher with the given seed
    pub fn new(seed: u64) -> Self {
        let state = RandomState::with_seeds(seed, !seed, seed, !seed);
        Self { seed, state }
    }

    /// Hash a u64 value using a seeded AHasher
    #[inline]
    pub fn hash_u64(&self, value: u64) -> u64 {
        let mut hasher = self.state.build_hasher();
        hasher.write_u64(value);
        hasher.finish()
    }

    /// Get the seed value
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Default for DeterministicHasher {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_SEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_hashing() {
        let hasher1 = DeterministicHasher::new(42);
        let hasher2 = DeterministicHasher::new(42);
        let hasher3 = DeterministicHasher::new(43);

        let value = 0x123456789abcdef0u64;

        // Same seed should produce same hash
        assert_eq!(hasher1.hash_u64(value), hasher2.hash_u64(value));

        // Different seed should produce different hash
        assert_ne!(hasher1.hash_u64(value), hasher3.hash_u64(value));
    }

    #[test]
    fn test_different_values_produce_different_hashes() {
        let hasher = DeterministicHasher::new(1);
        assert_ne!(hasher.hash_u64(100), hasher.hash_u64(101));
    }
}
