use std::sync::Arc;

use kestrel_consensus_core::{
    BlockHashMap, BlockHashSet, HashMapCustomHasher,
    blockhash::ORIGIN,
    blockstatus::BlockStatus,
    errors::pruning::{PruningImportError, PruningImportResult},
    pruning::{PruningPointInfo, PruningPointProof, PruningPointTrustedData},
    trusted::TrustedHeader,
};
use kestrel_core::info;
use kestrel_database::prelude::StagingArea;

use crate::{
    model::stores::{
        ghostdag::{GhostdagData, GhostdagStore, GhostdagStoreReader},
        headers::{HeaderStore, HeaderStoreReader},
        headers_selected_tip::HeadersSelectedTipStore,
        pruning::PruningStore,
        statuses::StatusesStore,
    },
    processes::ghostdag::ordering::SortableBlock,
};

use super::PruningProofManager;

impl PruningProofManager {
    /// Stores the proof headers along with the window and chain headers of the trusted data, and moves the
    /// pruning point to the last proof header. None of these blocks enter the reachability tree; blocks with
    /// bodies are added later through trusted block insertion
    pub fn apply_proof(&self, proof: PruningPointProof, trusted_data: &PruningPointTrustedData) -> PruningImportResult<()> {
        let pruning_point_header = proof.last().ok_or(PruningImportError::ProofEmpty)?.clone();
        let pruning_point = pruning_point_header.hash;

        let trusted_ghostdag: BlockHashMap<&TrustedHeader> =
            trusted_data.window_and_chain_headers.iter().map(|trusted| (trusted.header.hash, trusted)).collect();

        let area = StagingArea::new();
        let mut inserted = BlockHashSet::new();
        let mut previous = ORIGIN;
        for header in proof.iter() {
            let hash = header.hash;
            if !self.headers_store.has(hash).unwrap_or(false) && inserted.insert(hash) {
                let ghostdag_data = match trusted_ghostdag.get(&hash) {
                    Some(trusted) => GhostdagData::from(trusted.ghostdag.clone()),
                    None => GhostdagData::new(
                        header.blue_score,
                        header.blue_work,
                        previous,
                        Default::default(),
                        Default::default(),
                        Default::default(),
                    ),
                };
                self.headers_store.insert(&area, hash, header.clone(), self.block_level(header)).expect("header is new");
                self.ghostdag_store.insert(&area, hash, Arc::new(ghostdag_data), true).expect("ghostdag data is new");
                self.statuses_store.set(&area, hash, BlockStatus::StatusHeaderOnly).expect("status write");
            }
            previous = hash;
        }

        for trusted in trusted_data.window_and_chain_headers.iter() {
            let hash = trusted.header.hash;
            if self.headers_store.has(hash).unwrap_or(false) || !inserted.insert(hash) {
                continue;
            }
            self.headers_store.insert(&area, hash, trusted.header.clone(), self.block_level(&trusted.header)).expect("header is new");
            if !self.ghostdag_store.has(hash).unwrap_or(false) {
                self.ghostdag_store
                    .insert(&area, hash, Arc::new(trusted.ghostdag.clone().into()), true)
                    .expect("ghostdag data is new");
            }
        }

        let mut pruning_point_write = self.pruning_point_store.write();
        for (index, header) in proof.iter().enumerate() {
            pruning_point_write.insert_past_pruning_point(&area, index as u64, header.hash).expect("past pruning point write");
        }
        let index = proof.len() as u64 - 1;
        pruning_point_write.set(&area, PruningPointInfo::new(pruning_point, pruning_point, index)).expect("pruning point write");

        let mut selected_tip_write = self.headers_selected_tip_store.write();
        selected_tip_write
            .set(&area, SortableBlock::new(pruning_point, pruning_point_header.blue_work))
            .expect("headers selected tip write");

        area.commit_to_db(&self.db).expect("proof commit");
        drop(selected_tip_write);
        drop(pruning_point_write);

        info!("Applied a pruning point proof of {} headers, the pruning point is now {}", proof.len(), pruning_point);
        Ok(())
    }
}
