//! Data model, hashing domains, network parameters, error taxonomy and UTXO algebra
//! shared by every layer of the node.

use std::collections::{HashMap, HashSet};
use std::hash::{BuildHasher, Hasher};

pub use kestrel_hashes::Hash;

pub mod acceptance_data;
pub mod api;
pub mod block;
pub mod blockhash;
pub mod blockstatus;
pub mod coinbase;
pub mod config;
pub mod constants;
pub mod errors;
pub mod hashing;
pub mod header;
pub mod mass;
pub mod merkle;
pub mod multiset;
pub mod network;
pub mod notify;
pub mod payload;
pub mod pruning;
pub mod subnets;
pub mod trusted;
pub mod tx;
pub mod utxo;

/// Changes of the virtual selected chain. `removed` is ordered from the old sink downwards and
/// `added` from the common ancestor upwards
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainPath {
    pub added: Vec<Hash>,
    pub removed: Vec<Hash>,
}

/// Integer type for accumulated PoW of blue blocks. 192 bits are enough for the
/// total work of any realistic chain.
pub type BlueWorkType = kestrel_math::Uint192;

/// The type used to represent the GHOSTDAG K parameter
pub type KType = u16;

/// Pruning proof level of a block
pub type BlockLevel = u8;

/// Map from Block hash to K type
pub type HashKTypeMap = std::sync::Arc<BlockHashMap<KType>>;

/// This HashMap skips the hashing of the key and uses the key directly as the hash.
/// Should only be used for block hashes that have correct DAA, otherwise it is susceptible to DOS attacks.
pub type BlockHashMap<V> = HashMap<Hash, V, BlockHasher>;

/// Same as `BlockHashMap` but a `HashSet`.
pub type BlockHashSet = HashSet<Hash, BlockHasher>;

pub trait HashMapCustomHasher {
    fn new() -> Self;
    fn with_capacity(capacity: usize) -> Self;
}

impl<V> HashMapCustomHasher for BlockHashMap<V> {
    #[inline(always)]
    fn new() -> Self {
        Self::with_hasher(BlockHasher::new())
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, BlockHasher::new())
    }
}

impl HashMapCustomHasher for BlockHashSet {
    #[inline(always)]
    fn new() -> Self {
        Self::with_hasher(BlockHasher::new())
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, BlockHasher::new())
    }
}

/// A hasher for block hashes which folds the hash words together instead of rehashing them.
/// The length prefix the slice `Hash` impl emits is ignored.
#[derive(Default, Clone, Copy)]
pub struct BlockHasher(u64);

impl BlockHasher {
    #[inline(always)]
    pub const fn new() -> Self {
        Self(0)
    }
}

impl Hasher for BlockHasher {
    #[inline(always)]
    fn finish(&self) -> u64 {
        self.0
    }

    #[inline(always)]
    fn write(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            self.0 = self.0.rotate_left(17) ^ u64::from_le_bytes(word);
        }
    }

    #[inline(always)]
    fn write_usize(&mut self, _: usize) {}
}

impl BuildHasher for BlockHasher {
    type Hasher = Self;

    #[inline(always)]
    fn build_hasher(&self) -> Self::Hasher {
        Self(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_map_distinguishes_low_entropy_hashes() {
        let mut map = BlockHashMap::new();
        for i in 0..1000u64 {
            map.insert(Hash::from_u64_word(i), i);
        }
        assert_eq!(map.len(), 1000);
        assert_eq!(map.get(&Hash::from_u64_word(517)), Some(&517));

        let mut hashers = (0..4u64).map(|i| {
            let mut h = BlockHasher::new();
            std::hash::Hash::hash(&Hash::from_u64_word(i), &mut h);
            h.finish()
        });
        assert_ne!(hashers.next(), hashers.next());
    }
}
