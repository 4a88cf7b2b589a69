// public for benchmarks
#[doc(hidden)]
pub mod matrix;
#[doc(hidden)]
pub mod xoshiro;

use crate::matrix::Matrix;
use kestrel_consensus_core::{BlockLevel, config::params::PowVariant, hashing, header::Header};
use kestrel_hashes::{Hash, PowHasher};
use kestrel_math::Uint256;

/// Pre-computed per-header values so that only the nonce varies per attempt
pub struct State {
    matrix: Matrix,
    target: Uint256,
    // PRE_POW_HASH || TIME || 32 zero byte padding, without NONCE
    hasher: PowHasher,
}

impl State {
    #[inline]
    pub fn new(header: &Header, variant: PowVariant) -> Self {
        let target = Uint256::from_compact_target_bits(header.bits);
        let pre_pow_hash = hashing::header::hash_override_nonce_time(header, 0, header.timestamp);
        let hasher = PowHasher::new(pre_pow_hash, header.timestamp);
        let matrix = Matrix::generate(pre_pow_hash, variant);
        Self { matrix, target, hasher }
    }

    /// The pow hash for `nonce`, as memoized on blocks
    #[inline]
    #[must_use]
    pub fn calculate_pow_hash(&self, nonce: u64) -> Hash {
        let hash = self.hasher.finalize_with_nonce(nonce);
        self.matrix.heavy_hash(hash)
    }

    #[inline]
    #[must_use]
    pub fn calculate_pow(&self, nonce: u64) -> Uint256 {
        pow_hash_value(self.calculate_pow_hash(nonce))
    }

    /// Whether `nonce` meets the header target. The pow value must not exceed the target.
    #[inline]
    #[must_use]
    pub fn check_pow(&self, nonce: u64) -> (bool, Uint256) {
        let pow = self.calculate_pow(nonce);
        (pow <= self.target, pow)
    }

    pub fn target(&self) -> Uint256 {
        self.target
    }
}

/// Reads a pow hash as a big endian 256-bit integer
pub fn pow_hash_value(pow_hash: Hash) -> Uint256 {
    Uint256::from_be_bytes(pow_hash.as_bytes())
}

/// Computes the pow hash of a header at its own nonce
pub fn calc_block_pow_hash(header: &Header, variant: PowVariant) -> Hash {
    State::new(header, variant).calculate_pow_hash(header.nonce)
}

/// The block level of a block with the given pow hash. Each additional leading zero bit of the pow value
/// raises the level by one, so a block of level `l` is expected once every `2^l` blocks
pub fn calc_block_level_from_pow_hash(pow_hash: Hash, max_block_level: BlockLevel) -> BlockLevel {
    let bits = pow_hash_value(pow_hash).bits() as i64;
    let level = max_block_level as i64 - bits;
    level.clamp(0, max_block_level as i64) as BlockLevel
}
