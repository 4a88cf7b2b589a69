use std::sync::Arc;

use kestrel_consensus_core::{blockhash::BlockHashExtensions, config::params::BlockVersionSchedule};
use kestrel_hashes::Hash;

use crate::model::{
    services::reachability::{MTReachabilityService, ReachabilityService},
    stores::{ghostdag::CompactGhostdagData, headers::HeaderStoreReader, reachability::ReachabilityStoreReader},
};

/// Decides pruning points.
///
/// Blue scores are split into finality intervals of `finality_depth` units. From the point of view of a block,
/// the pruning point is the first chain block of the highest finality interval reached by chain blocks which
/// are at least `pruning_depth` blue score units below the block. It only moves forward along the chain,
/// starting from the pruning point the selected parent committed to in its header
#[derive(Clone)]
pub struct PruningPointManager<T: ReachabilityStoreReader, U: HeaderStoreReader> {
    block_versions: BlockVersionSchedule,
    genesis_hash: Hash,
    reachability_service: MTReachabilityService<T>,
    headers_store: Arc<U>,
}

impl<T: ReachabilityStoreReader, U: HeaderStoreReader> PruningPointManager<T, U> {
    pub fn new(
        block_versions: BlockVersionSchedule,
        genesis_hash: Hash,
        reachability_service: MTReachabilityService<T>,
        headers_store: Arc<U>,
    ) -> Self {
        Self { block_versions, genesis_hash, reachability_service, headers_store }
    }

    /// The pruning point a block with `ghostdag_data` at `daa_score` must commit to in its header. Returns `None`
    /// when the chain between the selected parent's pruning point and the selected parent is not locally known,
    /// which happens right above a pruning point imported with a proof
    pub fn expected_header_pruning_point(&self, ghostdag_data: CompactGhostdagData, daa_score: u64) -> Option<Hash> {
        let selected_parent = ghostdag_data.selected_parent;
        if selected_parent == self.genesis_hash || selected_parent.is_origin() {
            return Some(self.genesis_hash);
        }

        let version = self.block_versions.get(daa_score);
        let finality_depth = version.finality_depth().max(1);
        let pruning_depth = version.pruning_depth();

        let sp_pruning_point = match self.headers_store.get_header(selected_parent).ok()?.pruning_point {
            pp if pp.is_none() => self.genesis_hash,
            pp => pp,
        };
        let sp_pruning_point_blue_score = self.headers_store.get_blue_score(sp_pruning_point).ok()?;

        // No chain block can enter the next finality interval at pruning depth yet
        let next_interval_start = (sp_pruning_point_blue_score / finality_depth + 1) * finality_depth;
        if next_interval_start + pruning_depth > ghostdag_data.blue_score {
            return Some(sp_pruning_point);
        }

        if !self.reachability_service.has_reachability_data(sp_pruning_point)
            || !self.reachability_service.is_chain_ancestor_of(sp_pruning_point, selected_parent)
        {
            return None;
        }

        let mut pruning_point = sp_pruning_point;
        let mut pruning_point_interval = sp_pruning_point_blue_score / finality_depth;
        for chain_block in self.reachability_service.forward_chain_iterator(sp_pruning_point, selected_parent, true).skip(1) {
            let blue_score = self.headers_store.get_blue_score(chain_block).ok()?;
            if blue_score + pruning_depth > ghostdag_data.blue_score {
                break;
            }
            if blue_score / finality_depth > pruning_point_interval {
                pruning_point = chain_block;
                pruning_point_interval = blue_score / finality_depth;
            }
        }
        Some(pruning_point)
    }

    /// Whether `candidate` may replace `current` as the pruning point. Pruning points only advance along the chain
    pub fn is_valid_advance(&self, current: Hash, candidate: Hash) -> bool {
        candidate != current
            && self.reachability_service.has_reachability_data(candidate)
            && self.reachability_service.is_chain_ancestor_of(current, candidate)
    }
}
