use super::BlockBodyProcessor;
use crate::{
    model::{
        services::reachability::ReachabilityService,
        stores::{
            depth::DepthStoreReader,
            ghostdag::GhostdagStoreReader,
            pruning::PruningStoreReader,
            statuses::StatusesStoreReader,
        },
    },
    processes::transaction_validator::{LockTimeType, TransactionValidator},
};
use itertools::Itertools;
use kestrel_consensus_core::{
    block::Block,
    blockhash::BlockHashExtensions,
    errors::block::{BlockProcessResult, RuleError, VecDisplay},
};
use kestrel_database::prelude::StoreResultExt;
use kestrel_hashes::Hash;
use std::cell::LazyCell;

impl BlockBodyProcessor {
    pub fn validate_body_in_context(&self, block: &Block) -> BlockProcessResult<()> {
        self.check_parent_bodies_exist(block)?;
        self.check_coinbase_blue_score(block)?;
        self.check_bounded_merge_depth(block)?;
        self.check_block_transactions_in_context(block)
    }

    /// Parents below the pruning point never get bodies, so only parents in its future are required to have one
    fn check_parent_bodies_exist(&self, block: &Block) -> BlockProcessResult<()> {
        let pruning_point = self.pruning_point_store.read().pruning_point().expect("pruning point is initialized");
        let missing: Vec<Hash> = block
            .header
            .direct_parents()
            .iter()
            .copied()
            .filter(|&parent| {
                let status = self.statuses_store.get(parent).optional().expect("statuses store read");
                if status.is_some_and(|s| s.has_block_body()) {
                    return false;
                }
                self.reachability_service.has_reachability_data(parent)
                    && self.reachability_service.is_dag_ancestor_of(pruning_point, parent)
            })
            .collect();
        if !missing.is_empty() {
            return Err(RuleError::MissingParents(VecDisplay(missing)));
        }
        Ok(())
    }

    fn check_coinbase_blue_score(&self, block: &Block) -> BlockProcessResult<()> {
        let data =
            self.coinbase_manager.deserialize_coinbase_payload(&block.transactions[0].payload).map_err(RuleError::BadCoinbasePayload)?;
        if data.blue_score != block.header.blue_score {
            return Err(RuleError::BadCoinbasePayloadBlueScore(data.blue_score, block.header.blue_score));
        }
        Ok(())
    }

    /// Every merged red outside the future of the merge depth root must be in the past of a kosherizing blue,
    /// that is a mergeset blue which is itself in the future of the merge depth root
    fn check_bounded_merge_depth(&self, block: &Block) -> BlockProcessResult<()> {
        let hash = block.hash();
        let merge_depth_root = self.depth_store.merge_depth_root(hash).expect("depth points are stored with the header");
        if merge_depth_root.is_origin() {
            return Ok(());
        }

        let ghostdag_data = self.ghostdag_store.get_data(hash).expect("ghostdag data is stored with the header");
        let kosherizing_blues = self.depth_manager.kosherizing_blues(&ghostdag_data, merge_depth_root).collect_vec();
        for red in ghostdag_data.mergeset_reds.iter().copied() {
            if self.reachability_service.is_dag_ancestor_of(merge_depth_root, red) {
                continue;
            }
            if !self.reachability_service.is_dag_ancestor_of_any(red, &mut kosherizing_blues.iter().copied()) {
                return Err(RuleError::ViolatingBoundedMergeDepth(hash, red));
            }
        }
        Ok(())
    }

    fn check_block_transactions_in_context(&self, block: &Block) -> BlockProcessResult<()> {
        // Most transactions carry no time lock, so the past median time is only computed on demand
        let past_median_time = LazyCell::new(|| self.window_manager.calc_past_median_time_for_known_hash(block.hash()));

        let mut failed = Vec::new();
        for tx in block.transactions.iter() {
            let pmt = match TransactionValidator::get_lock_time_type(tx) {
                LockTimeType::Time => *past_median_time,
                LockTimeType::Finalized | LockTimeType::DaaScore => 0,
            };
            if let Err(err) = self.transaction_validator.validate_tx_in_header_context(tx, block.header.daa_score, pmt) {
                failed.push((tx.id(), err));
            }
        }
        if !failed.is_empty() {
            return Err(RuleError::InvalidTransactions(failed));
        }
        Ok(())
    }
}
