use crate::{
    model::stores::{
        ghostdag::{GhostdagData, GhostdagStoreReader},
        headers::HeaderStoreReader,
    },
    processes::ghostdag::ordering::SortableBlock,
};
use kestrel_consensus_core::{
    BlockHashSet, BlueWorkType,
    blockhash::BlockHashExtensions,
    config::{genesis::GenesisBlock, params::BlockVersionParams, params::BlockVersionSchedule},
    errors::difficulty::DifficultyResult,
};
use kestrel_hashes::Hash;
use kestrel_math::Uint256;
use std::{cmp::Reverse, collections::BinaryHeap, sync::Arc};

use super::{difficulty::DifficultyManager, past_median_time::PastMedianTimeManager};

/// A min-heap of window blocks by blue work: the lowest block of the window is on top
pub type BlockWindowHeap = BinaryHeap<Reverse<SortableBlock>>;

pub struct DaaWindow {
    pub window: Arc<BlockWindowHeap>,
    pub daa_score: u64,
    pub mergeset_non_daa: BlockHashSet,
}

impl DaaWindow {
    pub fn new(window: Arc<BlockWindowHeap>, daa_score: u64, mergeset_non_daa: BlockHashSet) -> Self {
        Self { window, daa_score, mergeset_non_daa }
    }
}

/// Builds block windows: the `size` blocks with the highest blue work in the past of a block.
///
/// Window sizes and the target block rate depend on the block version, which for a block (or the virtual)
/// is the version scheduled at its selected parent's DAA score plus one
#[derive(Clone)]
pub struct WindowManager<T: GhostdagStoreReader, V: HeaderStoreReader> {
    genesis_daa_score: u64,
    ghostdag_store: Arc<T>,
    headers_store: Arc<V>,
    block_versions: BlockVersionSchedule,
    difficulty_manager: DifficultyManager<V>,
    past_median_time_manager: PastMedianTimeManager<V>,
}

impl<T: GhostdagStoreReader, V: HeaderStoreReader> WindowManager<T, V> {
    pub fn new(
        genesis: &GenesisBlock,
        ghostdag_store: Arc<T>,
        headers_store: Arc<V>,
        block_versions: BlockVersionSchedule,
        min_difficulty_window_len: usize,
        max_difficulty_target: Uint256,
    ) -> Self {
        let difficulty_manager =
            DifficultyManager::new(headers_store.clone(), genesis.bits, min_difficulty_window_len, max_difficulty_target);
        let past_median_time_manager = PastMedianTimeManager::new(headers_store.clone(), genesis.timestamp);
        Self {
            genesis_daa_score: genesis.daa_score,
            ghostdag_store,
            headers_store,
            block_versions,
            difficulty_manager,
            past_median_time_manager,
        }
    }

    /// The version parameters governing a block with the given GHOSTDAG data
    pub fn block_version(&self, ghostdag_data: &GhostdagData) -> BlockVersionParams {
        *self.block_versions.get(self.expected_daa_score_floor(ghostdag_data.selected_parent))
    }

    /// The version parameters governing a child of `selected_parent`
    pub fn block_version_for_selected_parent(&self, selected_parent: Hash) -> BlockVersionParams {
        *self.block_versions.get(self.expected_daa_score_floor(selected_parent))
    }

    fn expected_daa_score_floor(&self, selected_parent: Hash) -> u64 {
        if selected_parent.is_origin() {
            return self.genesis_daa_score;
        }
        self.headers_store.get_daa_score(selected_parent).expect("selected parent has a header") + 1
    }

    pub fn block_window(&self, ghostdag_data: &GhostdagData, window_size: usize) -> Arc<BlockWindowHeap> {
        let mut window_heap = BoundedSizeBlockHeap::new(window_size);
        if window_size == 0 {
            return Arc::new(window_heap.binary_heap);
        }

        let mut current_ghostdag: Option<Arc<GhostdagData>> = None;
        loop {
            let current = current_ghostdag.as_deref().unwrap_or(ghostdag_data);
            let selected_parent = current.selected_parent;
            if selected_parent.is_origin() {
                break;
            }
            // Below the pruning point the chain may be cut short
            let Ok(parent_ghostdag) = self.ghostdag_store.get_data(selected_parent) else {
                break;
            };

            // Since the window is full and the selected parent's work is below its lowest block,
            // no deeper block can enter it
            if !window_heap.try_push(selected_parent, parent_ghostdag.blue_work) {
                break;
            }

            for block in self.descending_known_mergeset(current) {
                if !window_heap.try_push(block.hash, block.blue_work) {
                    break;
                }
            }

            current_ghostdag = Some(parent_ghostdag);
        }

        Arc::new(window_heap.binary_heap)
    }

    fn descending_known_mergeset(&self, ghostdag_data: &GhostdagData) -> Vec<SortableBlock> {
        let mut blocks: Vec<SortableBlock> = ghostdag_data
            .unordered_mergeset_without_selected_parent()
            .filter_map(|hash| self.ghostdag_store.get_blue_work(hash).ok().map(|blue_work| SortableBlock::new(hash, blue_work)))
            .collect();
        blocks.sort_unstable_by(|a, b| b.cmp(a));
        blocks
    }

    pub fn block_daa_window(&self, ghostdag_data: &GhostdagData) -> DaaWindow {
        let version = self.block_version(ghostdag_data);
        let window = self.block_window(ghostdag_data, version.difficulty_window_size);
        let (daa_score, mergeset_non_daa) =
            self.difficulty_manager.calc_daa_score_and_mergeset_non_daa_blocks(&window, ghostdag_data, self.ghostdag_store.as_ref());
        DaaWindow::new(window, daa_score, mergeset_non_daa)
    }

    pub fn calculate_difficulty_bits(&self, ghostdag_data: &GhostdagData, daa_window: &DaaWindow) -> u32 {
        let version = self.block_version(ghostdag_data);
        self.difficulty_manager.calculate_difficulty_bits(&daa_window.window, version.target_time_per_block)
    }

    pub fn calc_past_median_time(&self, ghostdag_data: &GhostdagData) -> (u64, Arc<BlockWindowHeap>) {
        let version = self.block_version(ghostdag_data);
        let window = self.block_window(ghostdag_data, version.past_median_time_window_size);
        (self.past_median_time_manager.calc_past_median_time(&window), window)
    }

    pub fn calc_past_median_time_for_known_hash(&self, hash: Hash) -> u64 {
        let ghostdag_data = self.ghostdag_store.get_data(hash).expect("known blocks have ghostdag data");
        self.calc_past_median_time(&ghostdag_data).0
    }

    pub fn estimate_network_hashes_per_second(&self, window: &BlockWindowHeap) -> DifficultyResult<u64> {
        self.difficulty_manager.estimate_network_hashes_per_second(window)
    }
}

struct BoundedSizeBlockHeap {
    binary_heap: BlockWindowHeap,
    size_bound: usize,
}

impl BoundedSizeBlockHeap {
    fn new(size_bound: usize) -> Self {
        Self { size_bound, binary_heap: BlockWindowHeap::with_capacity(size_bound) }
    }

    fn reached_size_bound(&self) -> bool {
        self.binary_heap.len() == self.size_bound
    }

    fn try_push(&mut self, hash: Hash, blue_work: BlueWorkType) -> bool {
        let r_sortable_block = Reverse(SortableBlock { hash, blue_work });
        if self.reached_size_bound() {
            if let Some(max) = self.binary_heap.peek() {
                if *max < r_sortable_block {
                    return false; // Heap is full and the suggested block is lower than the lowest in the window
                }
            }
            self.binary_heap.pop(); // Since the heap is reversed, this removes the block with the least blue work
        }
        self.binary_heap.push(r_sortable_block);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_heap_keeps_highest_work() {
        let mut heap = BoundedSizeBlockHeap::new(3);
        for (i, work) in [5u64, 9, 1, 7, 3].into_iter().enumerate() {
            heap.try_push((i as u64 + 1).into(), work.into());
        }
        let mut works = heap.binary_heap.iter().map(|b| b.0.blue_work.as_u64()).collect::<Vec<_>>();
        works.sort();
        assert_eq!(works, vec![5, 7, 9]);
        assert!(!heap.try_push(10.into(), 2.into()));
    }
}
