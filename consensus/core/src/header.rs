use crate::{BlueWorkType, hashing};
use kestrel_hashes::Hash;
use serde::{Deserialize, Serialize};
use std::mem::size_of;

/// A block header. `hash` is a cached value, computed on construction and whenever the
/// header is deserialized, so it can never disagree with the other fields.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "HeaderFields")]
pub struct Header {
    /// Cached hash
    #[serde(skip)]
    pub hash: Hash,
    pub version: u16,
    pub parents_by_level: Vec<Vec<Hash>>,
    pub hash_merkle_root: Hash,
    pub accepted_id_merkle_root: Hash,
    pub utxo_commitment: Hash,
    /// Timestamp is in milliseconds
    pub timestamp: u64,
    pub bits: u32,
    pub nonce: u64,
    pub daa_score: u64,
    pub blue_work: BlueWorkType,
    pub blue_score: u64,
    pub pruning_point: Hash,
}

#[derive(Deserialize)]
struct HeaderFields {
    version: u16,
    parents_by_level: Vec<Vec<Hash>>,
    hash_merkle_root: Hash,
    accepted_id_merkle_root: Hash,
    utxo_commitment: Hash,
    timestamp: u64,
    bits: u32,
    nonce: u64,
    daa_score: u64,
    blue_work: BlueWorkType,
    blue_score: u64,
    pruning_point: Hash,
}

impl From<HeaderFields> for Header {
    fn from(f: HeaderFields) -> Self {
        Header::new_finalized(
            f.version,
            f.parents_by_level,
            f.hash_merkle_root,
            f.accepted_id_merkle_root,
            f.utxo_commitment,
            f.timestamp,
            f.bits,
            f.nonce,
            f.daa_score,
            f.blue_work,
            f.blue_score,
            f.pruning_point,
        )
    }
}

impl Header {
    #[allow(clippy::too_many_arguments)]
    pub fn new_finalized(
        version: u16,
        parents_by_level: Vec<Vec<Hash>>,
        hash_merkle_root: Hash,
        accepted_id_merkle_root: Hash,
        utxo_commitment: Hash,
        timestamp: u64,
        bits: u32,
        nonce: u64,
        daa_score: u64,
        blue_work: BlueWorkType,
        blue_score: u64,
        pruning_point: Hash,
    ) -> Self {
        let mut header = Self {
            hash: Default::default(), // Temp init before the finalize below
            version,
            parents_by_level,
            hash_merkle_root,
            accepted_id_merkle_root,
            utxo_commitment,
            nonce,
            timestamp,
            daa_score,
            bits,
            blue_work,
            blue_score,
            pruning_point,
        };
        header.finalize();
        header
    }

    /// Finalizes the header and recomputes the header hash
    pub fn finalize(&mut self) {
        self.hash = hashing::header::hash(self);
    }

    pub fn direct_parents(&self) -> &[Hash] {
        if self.parents_by_level.is_empty() { &[] } else { &self.parents_by_level[0] }
    }

    /// Returns the parents at `level`, or an empty slice for levels above the recorded ones
    pub fn parents_at_level(&self, level: usize) -> &[Hash] {
        self.parents_by_level.get(level).map(|p| p.as_slice()).unwrap_or(&[])
    }

    /// WARNING: To be used for test purposes only
    pub fn from_precomputed_hash(hash: Hash, parents: Vec<Hash>) -> Header {
        Header {
            version: crate::constants::BLOCK_VERSION,
            hash,
            parents_by_level: vec![parents],
            hash_merkle_root: Default::default(),
            accepted_id_merkle_root: Default::default(),
            utxo_commitment: Default::default(),
            nonce: 0,
            timestamp: 0,
            daa_score: 0,
            bits: 0,
            blue_work: 0u64.into(),
            blue_score: 0,
            pruning_point: Default::default(),
        }
    }

    /// Rough in-memory size, used by caches which are bounded by bytes
    pub fn estimate_mem_bytes(&self) -> usize {
        size_of::<Self>() + self.parents_by_level.iter().map(|l| l.len()).sum::<usize>() * size_of::<Hash>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header::new_finalized(
            1,
            vec![vec![Hash::from_u64_word(1), Hash::from_u64_word(2)], vec![Hash::from_u64_word(3)]],
            Hash::from_u64_word(4),
            Hash::from_u64_word(5),
            Hash::from_u64_word(6),
            1_700_000_000_000,
            0x207fffff,
            42,
            100,
            123456u64.into(),
            99,
            Hash::from_u64_word(7),
        )
    }

    #[test]
    fn test_header_round_trip_is_identity() {
        let header = header();
        let bytes = bincode::serialize(&header).unwrap();
        let decoded: Header = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.hash, header.hash);
        assert_eq!(bincode::serialize(&decoded).unwrap(), bytes);
    }

    #[test]
    fn test_parents_accessors() {
        let header = header();
        assert_eq!(header.direct_parents().len(), 2);
        assert_eq!(header.parents_at_level(1), &[Hash::from_u64_word(3)]);
        assert!(header.parents_at_level(5).is_empty());
    }
}
