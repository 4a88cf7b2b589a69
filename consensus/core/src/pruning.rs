use crate::header::Header;
use kestrel_hashes::Hash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Headers of all past pruning points from genesis up to the current pruning point. Each header's
/// `pruning_point` field points at the previous proof header
pub type PruningPointProof = Vec<Arc<Header>>;

/// Headers of past pruning points, oldest first
pub type PruningPointsList = Vec<Arc<Header>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruningPointInfo {
    pub pruning_point: Hash,
    pub candidate: Hash,
    pub index: u64,
}

impl PruningPointInfo {
    pub fn new(pruning_point: Hash, candidate: Hash, index: u64) -> Self {
        Self { pruning_point, candidate, index }
    }

    pub fn from_genesis(genesis_hash: Hash) -> Self {
        Self { pruning_point: genesis_hash, candidate: genesis_hash, index: 0 }
    }
}
