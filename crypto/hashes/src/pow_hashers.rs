use crate::Hash;

/// The unkeyed Blake3 state used by the proof-of-work. It absorbs the pre-pow hash and
/// the timestamp once and is then cloned per nonce.
#[derive(Clone)]
pub struct PowHasher(blake3::Hasher);

impl PowHasher {
    #[inline]
    pub fn new(pre_pow_hash: Hash, timestamp: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&pre_pow_hash.as_bytes());
        hasher.update(&timestamp.to_le_bytes());
        hasher.update(&[0u8; 32]);
        Self(hasher)
    }

    #[inline(always)]
    pub fn finalize_with_nonce(&self, nonce: u64) -> Hash {
        let mut hasher = self.0.clone();
        hasher.update(&nonce.to_le_bytes());
        Hash::from_bytes(*hasher.finalize().as_bytes())
    }
}

/// Final unkeyed Blake3 applied to the matrix output
#[derive(Clone)]
pub struct HeavyHasher;

impl HeavyHasher {
    #[inline]
    pub fn hash(in_hash: Hash) -> Hash {
        Hash::from_bytes(*blake3::hash(&in_hash.as_bytes()).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow_hash_depends_on_nonce_and_time() {
        let pre = Hash::from_bytes([7; 32]);
        let hasher = PowHasher::new(pre, 1_000);
        assert_ne!(hasher.finalize_with_nonce(1), hasher.finalize_with_nonce(2));
        assert_ne!(hasher.finalize_with_nonce(1), PowHasher::new(pre, 1_001).finalize_with_nonce(1));
        assert_eq!(hasher.finalize_with_nonce(1), PowHasher::new(pre, 1_000).finalize_with_nonce(1));
        assert_ne!(HeavyHasher::hash(pre), pre);
    }
}
