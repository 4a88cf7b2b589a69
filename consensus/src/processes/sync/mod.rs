use std::sync::Arc;

use kestrel_consensus_core::errors::sync::{SyncManagerError, SyncManagerResult};
use kestrel_database::prelude::StoreResultExt;
use kestrel_hashes::Hash;
use parking_lot::RwLock;

use crate::{
    model::{
        services::reachability::{MTReachabilityService, ReachabilityService},
        stores::{
            ghostdag::GhostdagStoreReader, pruning::PruningStoreReader, reachability::ReachabilityStoreReader,
            selected_chain::SelectedChainStoreReader, statuses::StatusesStoreReader,
        },
    },
    processes::ghostdag::ordering::SortableBlock,
};

#[derive(Clone)]
pub struct SyncManager<
    T: ReachabilityStoreReader,
    U: GhostdagStoreReader,
    V: SelectedChainStoreReader,
    X: PruningStoreReader,
    Y: StatusesStoreReader,
> {
    reachability_service: MTReachabilityService<T>,
    ghostdag_store: Arc<U>,
    selected_chain_store: Arc<RwLock<V>>,
    pruning_store: Arc<RwLock<X>>,
    statuses_store: Arc<Y>,
}

impl<T: ReachabilityStoreReader, U: GhostdagStoreReader, V: SelectedChainStoreReader, X: PruningStoreReader, Y: StatusesStoreReader>
    SyncManager<T, U, V, X, Y>
{
    pub fn new(
        reachability_service: MTReachabilityService<T>,
        ghostdag_store: Arc<U>,
        selected_chain_store: Arc<RwLock<V>>,
        pruning_store: Arc<RwLock<X>>,
        statuses_store: Arc<Y>,
    ) -> Self {
        Self { reachability_service, ghostdag_store, selected_chain_store, pruning_store, statuses_store }
    }

    /// Returns the hashes of the blocks in the past of `high` which are not in the past of `low`, ordered
    /// chain block by chain block (each chain block follows its consensus ordered mergeset), along with the
    /// highest chain block reached. The result excludes `low` and includes `high` unless cut by `max_blocks`.
    ///
    /// Whole mergesets are returned, so the first chunk may exceed `max_blocks` when a single mergeset does
    pub fn antipast_hashes_between(&self, low: Hash, high: Hash, max_blocks: usize) -> SyncManagerResult<(Vec<Hash>, Hash)> {
        self.ensure_known(low)?;
        self.ensure_known(high)?;

        let common = self.find_highest_common_chain_block(low, high)?;
        let mut blocks = Vec::new();
        let mut highest = common;
        for current in self.reachability_service.forward_chain_iterator(common, high, true).skip(1) {
            let data = self.ghostdag_store.get_data(current).map_err(|_| SyncManagerError::BlockNotFound(current))?;
            let mut mergeset: Vec<SortableBlock> = data
                .unordered_mergeset_without_selected_parent()
                .filter_map(|hash| self.ghostdag_store.get_blue_work(hash).ok().map(|work| SortableBlock::new(hash, work)))
                .collect();
            mergeset.sort();

            let chunk: Vec<Hash> = mergeset
                .into_iter()
                .map(|block| block.hash)
                .chain(std::iter::once(current))
                .filter(|&hash| hash != low && !self.reachability_service.is_dag_ancestor_of(hash, low))
                .collect();

            if !blocks.is_empty() && blocks.len() + chunk.len() > max_blocks {
                break;
            }
            blocks.extend(chunk);
            highest = current;
            if blocks.len() >= max_blocks {
                break;
            }
        }

        Ok((blocks, highest))
    }

    fn find_highest_common_chain_block(&self, low: Hash, high: Hash) -> SyncManagerResult<Hash> {
        self.reachability_service
            .default_backward_chain_iterator(low)
            .find(|&candidate| self.reachability_service.is_chain_ancestor_of(candidate, high))
            .ok_or(SyncManagerError::BlockNotInSelectedParentChain(low))
    }

    fn ensure_known(&self, hash: Hash) -> SyncManagerResult<()> {
        match self.ghostdag_store.has(hash) {
            Ok(true) => Ok(()),
            _ => Err(SyncManagerError::BlockNotFound(hash)),
        }
    }

    /// Returns the blocks between the pruning point and `high` which have a header but no body
    pub fn get_missing_block_body_hashes(&self, high: Hash) -> SyncManagerResult<Vec<Hash>> {
        let pruning_point = self.pruning_point();
        if !self.reachability_service.is_chain_ancestor_of(pruning_point, high) {
            return Err(SyncManagerError::PruningPointNotInChain(pruning_point, high));
        }

        // The lowest chain block lacking a body bounds the search from below
        let mut low = pruning_point;
        for current in self.reachability_service.forward_chain_iterator(pruning_point, high, true) {
            if !self.has_body(current) {
                break;
            }
            low = current;
        }
        if low == high {
            return Ok(vec![]);
        }

        let (hashes, _) = self.antipast_hashes_between(low, high, usize::MAX)?;
        Ok(hashes.into_iter().filter(|&hash| !self.has_body(hash)).collect())
    }

    fn has_body(&self, hash: Hash) -> bool {
        self.statuses_store.get(hash).optional().ok().flatten().is_some_and(|status| status.has_block_body())
    }

    fn pruning_point(&self) -> Hash {
        self.pruning_store.read().pruning_point().expect("the pruning point is always initialized")
    }

    /// Builds a locator along the selected chain of `high`, descending by exponentially growing blue score
    /// steps down to the pruning point, which ends the locator unless `limit` cuts it first
    pub fn create_block_locator_from_pruning_point(&self, high: Hash, limit: usize) -> SyncManagerResult<Vec<Hash>> {
        self.ensure_known(high)?;
        let low = self.pruning_point();
        if !self.reachability_service.is_chain_ancestor_of(low, high) {
            return Err(SyncManagerError::PruningPointNotInChain(low, high));
        }

        let low_blue_score = self.blue_score(low)?;
        let mut locator = Vec::new();
        let mut current = high;
        let mut step = 1u64;
        loop {
            locator.push(current);
            if locator.len() >= limit || current == low {
                break;
            }
            let target = self.blue_score(current)?.saturating_sub(step);
            current = if target <= low_blue_score { low } else { self.chain_block_at_or_above(current, target)? };
            step = step.saturating_mul(2);
        }
        Ok(locator)
    }

    /// Walks the selected chain of `from` down to the lowest block whose blue score is still at least `blue_score`
    fn chain_block_at_or_above(&self, from: Hash, blue_score: u64) -> SyncManagerResult<Hash> {
        let mut current = from;
        loop {
            let data = self.ghostdag_store.get_compact_data(current).map_err(|_| SyncManagerError::BlockNotFound(current))?;
            match self.ghostdag_store.get_blue_score(data.selected_parent) {
                Ok(score) if score >= blue_score => current = data.selected_parent,
                _ => return Ok(current),
            }
        }
    }

    fn blue_score(&self, hash: Hash) -> SyncManagerResult<u64> {
        self.ghostdag_store.get_blue_score(hash).map_err(|_| SyncManagerError::BlockNotFound(hash))
    }

    /// Builds a locator over the virtual selected chain between `low` (default: the pruning point) and `high`
    /// (default: the sink), taking exponentially growing index steps from `high` downwards. The result always
    /// ends with `low`
    pub fn create_virtual_selected_chain_block_locator(&self, low: Option<Hash>, high: Option<Hash>) -> SyncManagerResult<Vec<Hash>> {
        let chain = self.selected_chain_store.read();
        let low = low.unwrap_or_else(|| self.pruning_point());
        let high = match high {
            Some(high) => high,
            None => chain.get_tip().expect("the selected chain is always initialized").1,
        };

        if low == high {
            return Ok(vec![low]);
        }

        let index_of = |hash: Hash| match chain.get_by_hash(hash).optional() {
            Ok(Some(index)) => Ok(index),
            _ => Err(SyncManagerError::BlockNotInSelectedParentChain(hash)),
        };
        let low_index = index_of(low)?;
        let high_index = index_of(high)?;
        if low_index > high_index {
            return Err(SyncManagerError::LowHashHigherThanHighHash(low, high));
        }

        let mut locator = Vec::with_capacity((u64::BITS - (high_index - low_index).leading_zeros()) as usize + 1);
        let mut step = 1u64;
        let mut current_index = high_index;
        while current_index > low_index {
            locator.push(chain.get_by_index(current_index).map_err(|_| SyncManagerError::BlockNotInSelectedParentChain(high))?);
            current_index = current_index.saturating_sub(step).max(low_index);
            step = step.saturating_mul(2);
        }
        locator.push(low);
        Ok(locator)
    }
}
