use kestrel_hashes::{HASH_SIZE, Hash};
use std::sync::Arc;

/// A shared immutable list of block hashes
pub type BlockHashes = Arc<Vec<Hash>>;

pub const NONE: Hash = Hash::from_bytes([0u8; HASH_SIZE]);

/// Hash of the synthetic virtual block
pub const VIRTUAL: Hash = Hash::from_bytes([0xff; HASH_SIZE]);

/// Synthetic root standing in for the unknown past of blocks received with trusted data
pub const ORIGIN: Hash = Hash::from_bytes([
    0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe,
]);

pub trait BlockHashExtensions {
    fn is_none(&self) -> bool;
    fn is_virtual(&self) -> bool;
    fn is_origin(&self) -> bool;
}

impl BlockHashExtensions for Hash {
    fn is_none(&self) -> bool {
        self.eq(&NONE)
    }

    fn is_virtual(&self) -> bool {
        self.eq(&VIRTUAL)
    }

    fn is_origin(&self) -> bool {
        self.eq(&ORIGIN)
    }
}
