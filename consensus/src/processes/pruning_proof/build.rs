use std::sync::Arc;

use kestrel_consensus_core::{
    BlockHashSet, HashMapCustomHasher,
    blockhash::BlockHashExtensions,
    errors::consensus::{ConsensusError, ConsensusResult},
    pruning::{PruningPointProof, PruningPointTrustedData},
    trusted::TrustedHeader,
};
use kestrel_core::debug;
use kestrel_hashes::Hash;

use crate::{
    model::stores::{ghostdag::GhostdagStoreReader, headers::HeaderStoreReader, pruning::PruningStoreReader, tips::TipsStoreReader},
    processes::ghostdag::ordering::SortableBlock,
};

use super::{CachedPruningPointData, PruningProofManager};

impl PruningProofManager {
    pub fn get_pruning_point_proof(&self) -> Arc<PruningPointProof> {
        let pruning_point = self.pruning_point_store.read().pruning_point().expect("the pruning point is always initialized");
        let mut cache_lock = self.cached_proof.lock();
        if let Some(cache) = cache_lock.clone() {
            if cache.pruning_point == pruning_point {
                return cache.data;
            }
        }
        let proof = Arc::new(self.build_pruning_point_proof(pruning_point));
        cache_lock.replace(CachedPruningPointData { pruning_point, data: proof.clone() });
        proof
    }

    /// Follows the `pruning_point` header links from `pruning_point` down to genesis
    pub(super) fn build_pruning_point_proof(&self, pruning_point: Hash) -> PruningPointProof {
        let genesis_hash = self.genesis_hash();
        let mut proof = Vec::new();
        let mut current = pruning_point;
        loop {
            let header = self.headers_store.get_header(current).expect("past pruning points have headers");
            proof.push(header.clone());
            if current == genesis_hash || header.pruning_point.is_none() {
                break;
            }
            current = header.pruning_point;
        }
        proof.reverse();
        debug!("Built a pruning point proof of {} headers for {}", proof.len(), pruning_point);
        proof
    }

    pub fn get_pruning_point_anticone_and_trusted_data(&self) -> ConsensusResult<Arc<PruningPointTrustedData>> {
        let pruning_point = self.pruning_point_store.read().pruning_point().expect("the pruning point is always initialized");
        let mut cache_lock = self.cached_trusted_data.lock();
        if let Some(cache) = cache_lock.clone() {
            if cache.pruning_point == pruning_point {
                return Ok(cache.data);
            }
        }
        let data = Arc::new(self.calculate_pruning_point_anticone_and_trusted_data(pruning_point)?);
        cache_lock.replace(CachedPruningPointData { pruning_point, data: data.clone() });
        Ok(data)
    }

    fn calculate_pruning_point_anticone_and_trusted_data(&self, pruning_point: Hash) -> ConsensusResult<PruningPointTrustedData> {
        let tips = self.body_tips_store.read().get().map_err(|_| ConsensusError::General("body tips are not initialized"))?;
        let mut anticone = vec![pruning_point];
        anticone.extend(self.traversal_manager.anticone(pruning_point, tips.iter().copied(), None)?);

        let window_size = self
            .params
            .block_versions
            .max_difficulty_window_size()
            .max(self.params.block_versions.max_past_median_time_window_size());
        let chain_depth = self.params.block_versions.max_ghostdag_k() as usize + 1;

        let mut visited = BlockHashSet::new();
        let mut collected: Vec<SortableBlock> = Vec::new();
        let mut collect = |hash: Hash| -> ConsensusResult<()> {
            if hash.is_origin() || !visited.insert(hash) {
                return Ok(());
            }
            let blue_work = self.ghostdag_store.get_blue_work(hash).map_err(|_| ConsensusError::MissingData(hash))?;
            collected.push(SortableBlock::new(hash, blue_work));
            Ok(())
        };

        for &block in anticone.iter() {
            let ghostdag_data = self.ghostdag_store.get_data(block).map_err(|_| ConsensusError::MissingData(block))?;
            for window_block in self.window_manager.block_window(&ghostdag_data, window_size).iter() {
                collect(window_block.0.hash)?;
            }

            let mut current = ghostdag_data.selected_parent;
            for _ in 0..chain_depth {
                if current.is_origin() || !self.ghostdag_store.has(current).unwrap_or(false) {
                    break;
                }
                collect(current)?;
                current = self.ghostdag_store.get_selected_parent(current).map_err(|_| ConsensusError::MissingData(current))?;
            }
        }

        // Ascending blue work keeps every header after its selected parent
        collected.sort();
        let window_and_chain_headers = collected
            .into_iter()
            .map(|block| {
                let header = self.headers_store.get_header(block.hash).map_err(|_| ConsensusError::HeaderNotFound(block.hash))?;
                let ghostdag = self.ghostdag_store.get_data(block.hash).map_err(|_| ConsensusError::MissingData(block.hash))?;
                Ok(TrustedHeader::new(header, ghostdag.as_ref().into()))
            })
            .collect::<ConsensusResult<Vec<_>>>()?;

        debug!(
            "Pruning point {} has an anticone of {} blocks, reaching {} window and chain headers",
            pruning_point,
            anticone.len() - 1,
            window_and_chain_headers.len()
        );
        Ok(PruningPointTrustedData { anticone, window_and_chain_headers })
    }
}
