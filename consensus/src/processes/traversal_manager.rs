use std::{collections::VecDeque, sync::Arc};

use kestrel_consensus_core::{
    BlockHashSet, ChainPath, HashMapCustomHasher,
    blockhash::BlockHashExtensions,
    errors::traversal::{TraversalError, TraversalResult},
};
use kestrel_hashes::Hash;

use crate::{
    model::{
        services::reachability::{MTReachabilityService, ReachabilityService},
        stores::{ghostdag::GhostdagStoreReader, reachability::ReachabilityStoreReader, relations::RelationsStoreReader},
    },
    processes::ghostdag::ordering::SortableBlock,
};

/// DAG navigation beyond single parent/child lookups: selected chain paths and anticones
#[derive(Clone)]
pub struct DagTraversalManager<T: GhostdagStoreReader, S: RelationsStoreReader, U: ReachabilityStoreReader> {
    ghostdag_store: Arc<T>,
    relations_store: Arc<S>,
    reachability_service: MTReachabilityService<U>,
}

impl<T: GhostdagStoreReader, S: RelationsStoreReader, U: ReachabilityStoreReader> DagTraversalManager<T, S, U> {
    pub fn new(ghostdag_store: Arc<T>, relations_store: Arc<S>, reachability_service: MTReachabilityService<U>) -> Self {
        Self { ghostdag_store, relations_store, reachability_service }
    }

    /// Returns the path leading from the selected chain of `from` to the selected chain of `to`.
    /// `removed` lists the blocks of `from`'s chain above the common ancestor starting at `from`, and
    /// `added` lists the blocks of `to`'s chain above it, ending at `to`
    pub fn calculate_chain_path(&self, from: Hash, to: Hash) -> ChainPath {
        let mut removed = Vec::new();
        let mut common_ancestor = from;
        for current in self.reachability_service.default_backward_chain_iterator(from) {
            if self.reachability_service.is_chain_ancestor_of(current, to) {
                common_ancestor = current;
                break;
            }
            removed.push(current);
        }

        let added = self.reachability_service.forward_chain_iterator(common_ancestor, to, true).skip(1).collect();
        ChainPath { added, removed }
    }

    /// Returns the anticone of `block` as seen from `tips`, in ascending blue work order (which is topological).
    ///
    /// The traversal descends from the tips through parent links and stops at the past of `block`. Blocks in
    /// the future of `block` are passed through but not reported. When `max_traversal_allowed` is set, visiting
    /// more blocks than that fails the call
    pub fn anticone(
        &self,
        block: Hash,
        tips: impl Iterator<Item = Hash>,
        max_traversal_allowed: Option<u64>,
    ) -> TraversalResult<Vec<Hash>> {
        let mut anticone = Vec::new();
        let mut queue: VecDeque<Hash> = tips.collect();
        let mut visited = BlockHashSet::new();
        let mut traversal_count = 0u64;

        while let Some(current) = queue.pop_front() {
            if current.is_origin() || !visited.insert(current) {
                continue;
            }
            if current == block || self.reachability_service.is_dag_ancestor_of(current, block) {
                continue;
            }

            traversal_count += 1;
            if let Some(max_traversal_allowed) = max_traversal_allowed {
                if traversal_count > max_traversal_allowed {
                    return Err(TraversalError::ReachedMaxTraversalAllowed(traversal_count, max_traversal_allowed));
                }
            }

            if !self.reachability_service.is_dag_ancestor_of(block, current) {
                anticone.push(current);
            }

            // Parents of blocks whose past was cut off are unknown
            if let Ok(parents) = self.relations_store.get_parents(current) {
                queue.extend(parents.iter().copied());
            }
        }

        Ok(self.sort_by_blue_work(anticone))
    }

    /// Returns the lowest block of the selected chain of `high` whose blue score is at least `blue_score`,
    /// or the lowest known chain block if the whole chain lies above it
    pub fn lowest_chain_block_above_or_equal_to_blue_score(&self, high: Hash, blue_score: u64) -> Hash {
        let mut current = high;
        loop {
            let data = self.ghostdag_store.get_compact_data(current).expect("chain blocks have ghostdag data");
            if data.blue_score == blue_score || data.selected_parent.is_origin() {
                return current;
            }
            match self.ghostdag_store.get_blue_score(data.selected_parent) {
                Ok(parent_score) if parent_score >= blue_score => current = data.selected_parent,
                _ => return current,
            }
        }
    }

    fn sort_by_blue_work(&self, blocks: Vec<Hash>) -> Vec<Hash> {
        let mut sortable: Vec<SortableBlock> = blocks
            .into_iter()
            .map(|hash| SortableBlock::new(hash, self.ghostdag_store.get_blue_work(hash).unwrap_or_default()))
            .collect();
        sortable.sort();
        sortable.into_iter().map(|block| block.hash).collect()
    }
}
