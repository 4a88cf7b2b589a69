use std::sync::Arc;

use indexmap::IndexSet;
use kestrel_consensus_core::{BlockHashSet, BlockHasher, BlockLevel, HashMapCustomHasher, header::Header};
use kestrel_hashes::Hash;

use crate::model::{services::reachability::ReachabilityService, stores::headers::HeaderStoreReader};

/// Builds the multi-level parents of a new block from its direct parents.
///
/// Level 0 holds the direct parents. At level `l > 0` the candidates are the direct parents whose own block
/// level is at least `l`, together with the level `l` parents of the remaining direct parents. Candidates
/// which are ancestors of another candidate are dropped. Levels end with the first level holding only genesis,
/// and every level above the ones listed in a header is implicitly genesis.
///
/// Candidates lacking reachability data (below the pruning point of a node which synced with a proof) cannot
/// be compared and are all kept, so such a level is an upper bound of the expected one
#[derive(Clone)]
pub struct ParentsManager<T: HeaderStoreReader, U: ReachabilityService> {
    max_block_level: BlockLevel,
    genesis_hash: Hash,
    headers_store: Arc<T>,
    reachability_service: U,
}

impl<T: HeaderStoreReader, U: ReachabilityService> ParentsManager<T, U> {
    pub fn new(max_block_level: BlockLevel, genesis_hash: Hash, headers_store: Arc<T>, reachability_service: U) -> Self {
        Self { max_block_level, genesis_hash, headers_store, reachability_service }
    }

    pub fn calc_block_parents(&self, direct_parents: &[Hash]) -> Vec<Vec<Hash>> {
        let parent_headers: Vec<_> = direct_parents
            .iter()
            .map(|&parent| self.headers_store.get_header_with_block_level(parent).expect("direct parents have headers"))
            .collect();

        let mut level_zero = direct_parents.to_vec();
        level_zero.sort();
        let mut parents = vec![level_zero];

        for level in 1..=self.max_block_level {
            let mut candidates: IndexSet<Hash, BlockHasher> = IndexSet::with_hasher(BlockHasher::new());
            for parent in parent_headers.iter() {
                if parent.block_level >= level {
                    candidates.insert(parent.header.hash);
                } else {
                    candidates.extend(self.parents_at_level(&parent.header, level));
                }
            }

            let level_parents = self.filter_ancestors(candidates);
            let only_genesis = level_parents.len() == 1 && level_parents[0] == self.genesis_hash;
            parents.push(level_parents);
            if only_genesis {
                break;
            }
        }

        parents
    }

    fn parents_at_level(&self, header: &Header, level: BlockLevel) -> Vec<Hash> {
        match header.parents_by_level.get(level as usize) {
            Some(parents) => parents.clone(),
            None if header.parents_by_level.is_empty() => vec![],
            None => vec![self.genesis_hash],
        }
    }

    fn filter_ancestors(&self, candidates: IndexSet<Hash, BlockHasher>) -> Vec<Hash> {
        let known: Vec<Hash> =
            candidates.iter().copied().filter(|&hash| self.reachability_service.has_reachability_data(hash)).collect();
        let mut result: Vec<Hash> = candidates
            .into_iter()
            .filter(|&candidate| {
                !known.contains(&candidate)
                    || !known.iter().any(|&other| other != candidate && self.reachability_service.is_dag_ancestor_of(candidate, other))
            })
            .collect();
        result.sort();
        result
    }

    /// Checks `header_parents` against the expected parents. Levels built only from known candidates must
    /// match exactly, while levels with unknown candidates only bound the header from above
    pub fn parents_match(&self, expected: &[Vec<Hash>], header_parents: &[Vec<Hash>]) -> bool {
        let all_known =
            expected.iter().flatten().all(|&hash| hash == self.genesis_hash || self.reachability_service.has_reachability_data(hash));
        if all_known && expected.len() != header_parents.len() {
            return false;
        }
        if header_parents.len() > expected.len() {
            return false;
        }

        expected.iter().zip(header_parents.iter()).all(|(expected_level, header_level)| {
            let expected_set: BlockHashSet = expected_level.iter().copied().collect();
            let header_set: BlockHashSet = header_level.iter().copied().collect();
            if header_set.len() != header_level.len() {
                return false;
            }
            let level_known = expected_level.iter().all(|&hash| self.reachability_service.has_reachability_data(hash));
            if level_known { expected_set == header_set } else { header_set.is_subset(&expected_set) && !header_set.is_empty() }
        })
    }
}
