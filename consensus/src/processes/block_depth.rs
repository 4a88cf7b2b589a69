use std::sync::Arc;

use kestrel_consensus_core::{blockhash::BlockHashExtensions, config::params::BlockVersionSchedule};
use kestrel_hashes::Hash;

use crate::model::{
    services::reachability::{MTReachabilityService, ReachabilityService},
    stores::{
        depth::DepthStoreReader,
        ghostdag::{GhostdagData, GhostdagStoreReader},
        reachability::ReachabilityStoreReader,
    },
};

enum BlockDepthType {
    MergeRoot,
    Finality,
}

/// Locates the chain blocks at merge depth and at finality depth below a block
#[derive(Clone)]
pub struct BlockDepthManager<S: DepthStoreReader, U: ReachabilityStoreReader, V: GhostdagStoreReader> {
    block_versions: BlockVersionSchedule,
    genesis_hash: Hash,
    depth_store: Arc<S>,
    reachability_service: MTReachabilityService<U>,
    ghostdag_store: Arc<V>,
}

impl<S: DepthStoreReader, U: ReachabilityStoreReader, V: GhostdagStoreReader> BlockDepthManager<S, U, V> {
    pub fn new(
        block_versions: BlockVersionSchedule,
        genesis_hash: Hash,
        depth_store: Arc<S>,
        reachability_service: MTReachabilityService<U>,
        ghostdag_store: Arc<V>,
    ) -> Self {
        Self { block_versions, genesis_hash, depth_store, reachability_service, ghostdag_store }
    }

    pub fn calc_merge_depth_root(&self, ghostdag_data: &GhostdagData, daa_score: u64, pruning_point: Hash) -> Hash {
        let depth = self.block_versions.get(daa_score).merge_depth;
        self.calculate_block_at_depth(ghostdag_data, depth, pruning_point, BlockDepthType::MergeRoot)
    }

    pub fn calc_finality_point(&self, ghostdag_data: &GhostdagData, daa_score: u64, pruning_point: Hash) -> Hash {
        let depth = self.block_versions.get(daa_score).finality_depth();
        self.calculate_block_at_depth(ghostdag_data, depth, pruning_point, BlockDepthType::Finality)
    }

    /// Returns the highest chain block below `ghostdag_data` whose blue score is less than the block's blue
    /// score minus `depth`. The search resumes from the selected parent's result and never descends below
    /// the pruning point
    fn calculate_block_at_depth(&self, ghostdag_data: &GhostdagData, depth: u64, pruning_point: Hash, kind: BlockDepthType) -> Hash {
        let selected_parent = ghostdag_data.selected_parent;
        if ghostdag_data.blue_score < depth || selected_parent == self.genesis_hash || selected_parent.is_origin() {
            return self.genesis_hash;
        }
        let required_blue_score = ghostdag_data.blue_score - depth;

        let stored = match kind {
            BlockDepthType::MergeRoot => self.depth_store.merge_depth_root(selected_parent),
            BlockDepthType::Finality => self.depth_store.finality_point(selected_parent),
        };
        let mut current = match stored {
            Ok(hash)
                if self.reachability_service.has_reachability_data(hash)
                    && self.reachability_service.is_chain_ancestor_of(pruning_point, hash) =>
            {
                hash
            }
            _ => pruning_point,
        };

        for chain_block in self.reachability_service.forward_chain_iterator(current, selected_parent, true) {
            let blue_score = self.ghostdag_store.get_blue_score(chain_block).expect("chain blocks have ghostdag data");
            if blue_score >= required_blue_score {
                break;
            }
            current = chain_block;
        }
        current
    }

    /// Returns the mergeset blues which are in the future of the merge depth root. A red which is below the
    /// merge depth root may only be merged if one of these has it in its past
    pub fn kosherizing_blues<'a>(
        &'a self,
        ghostdag_data: &'a GhostdagData,
        merge_depth_root: Hash,
    ) -> impl Iterator<Item = Hash> + 'a {
        ghostdag_data
            .mergeset_blues
            .iter()
            .copied()
            .filter(move |&blue| self.reachability_service.is_dag_ancestor_of(merge_depth_root, blue))
    }
}
