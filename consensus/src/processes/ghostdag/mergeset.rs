use super::protocol::GhostdagManager;
use crate::model::stores::ghostdag::GhostdagStoreReader;
use crate::model::stores::relations::RelationsStoreReader;
use crate::model::{services::reachability::ReachabilityService, stores::headers::HeaderStoreReader};
use kestrel_consensus_core::BlockHashSet;
use kestrel_hashes::Hash;
use std::collections::VecDeque;

impl<T: GhostdagStoreReader, S: RelationsStoreReader, U: ReachabilityService, V: HeaderStoreReader> GhostdagManager<T, S, U, V> {
    /// Returns `past(parents) \ past(selected_parent)` without the selected parent itself, in ascending
    /// blue work order. Parents of blocks below the pruning point may be unknown and are skipped
    pub fn ordered_mergeset_without_selected_parent(&self, selected_parent: Hash, parents: &[Hash]) -> Vec<Hash> {
        let mut queue: VecDeque<_> = parents.iter().copied().filter(|p| p != &selected_parent).collect();
        let mut mergeset: BlockHashSet = queue.iter().copied().collect();
        let mut selected_parent_past = BlockHashSet::default();

        while let Some(current) = queue.pop_front() {
            let Ok(current_parents) = self.relations_store.get_parents(current) else {
                continue;
            };

            // Every parent outside the selected parent's past belongs to the mergeset and is explored further
            for parent in current_parents.iter().copied() {
                if mergeset.contains(&parent) || selected_parent_past.contains(&parent) {
                    continue;
                }
                if !self.reachability_service.has_reachability_data(parent) {
                    continue;
                }
                if self.reachability_service.is_dag_ancestor_of(parent, selected_parent) {
                    selected_parent_past.insert(parent);
                    continue;
                }
                mergeset.insert(parent);
                queue.push_back(parent);
            }
        }

        self.sort_blocks(mergeset)
    }
}
