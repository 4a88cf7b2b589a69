use crate::model::stores::{
    ghostdag::{GhostdagData, GhostdagStoreReader},
    headers::HeaderStoreReader,
};
use kestrel_consensus_core::{
    BlockHashSet, BlueWorkType,
    config::constants::consensus::MIN_DIFFICULTY_WINDOW_LEN,
    errors::difficulty::{DifficultyError, DifficultyResult},
};
use kestrel_math::{Uint256, Uint320};
use std::{
    cmp::{Ordering, max},
    iter::once_with,
    sync::Arc,
};

use super::{ghostdag::ordering::SortableBlock, window::BlockWindowHeap};
use itertools::Itertools;

/// Computes DAA scores and required difficulty over full (un-sampled) DAA windows
#[derive(Clone)]
pub struct DifficultyManager<T: HeaderStoreReader> {
    headers_store: Arc<T>,
    genesis_bits: u32,
    min_difficulty_window_len: usize,
    max_difficulty_target: Uint320,
}

impl<T: HeaderStoreReader> DifficultyManager<T> {
    pub fn new(headers_store: Arc<T>, genesis_bits: u32, min_difficulty_window_len: usize, max_difficulty_target: Uint256) -> Self {
        assert!(
            MIN_DIFFICULTY_WINDOW_LEN <= min_difficulty_window_len,
            "min_difficulty_window_len {min_difficulty_window_len} is expected to be at least {MIN_DIFFICULTY_WINDOW_LEN}"
        );
        Self { headers_store, genesis_bits, min_difficulty_window_len, max_difficulty_target: max_difficulty_target.into() }
    }

    /// Mergeset blocks with less blue work than the lowest block of the DAA window are not counted
    /// in the DAA score. With an empty window the whole mergeset is non-DAA
    pub fn calc_daa_score_and_mergeset_non_daa_blocks(
        &self,
        window: &BlockWindowHeap,
        ghostdag_data: &GhostdagData,
        store: &(impl GhostdagStoreReader + ?Sized),
    ) -> (u64, BlockHashSet) {
        let default_lowest_block = SortableBlock { hash: Default::default(), blue_work: BlueWorkType::MAX };
        let window_lowest_block = window.peek().map(|x| &x.0).unwrap_or(&default_lowest_block);
        let mergeset_non_daa: BlockHashSet = ghostdag_data
            .ascending_mergeset_without_selected_parent(store)
            .chain(once_with(|| {
                let selected_parent_hash = ghostdag_data.selected_parent;
                SortableBlock { hash: selected_parent_hash, blue_work: store.get_blue_work(selected_parent_hash).unwrap_or_default() }
            }))
            .take_while(|sortable_block| sortable_block < window_lowest_block)
            .map(|sortable_block| sortable_block.hash)
            .collect();

        let sp_daa_score = self.headers_store.get_daa_score(ghostdag_data.selected_parent).expect("selected parent has a header");
        (sp_daa_score + (ghostdag_data.mergeset_size() - mergeset_non_daa.len()) as u64, mergeset_non_daa)
    }

    fn get_difficulty_blocks(&self, window: &BlockWindowHeap) -> Vec<DifficultyBlock> {
        window
            .iter()
            .map(|item| {
                let data = self.headers_store.get_compact_header_data(item.0.hash).expect("window blocks have headers");
                DifficultyBlock { timestamp: data.timestamp, bits: data.bits, sortable_block: item.0 }
            })
            .collect()
    }

    /// The average target of the window without its earliest block, scaled by the ratio of the
    /// observed timespan to the expected one, and capped at the maximum target
    pub fn calculate_difficulty_bits(&self, window: &BlockWindowHeap, target_time_per_block: u64) -> u32 {
        let mut difficulty_blocks = self.get_difficulty_blocks(window);

        // Until there are enough blocks for a valid calculation the difficulty should remain constant
        if difficulty_blocks.len() < self.min_difficulty_window_len {
            return self.genesis_bits;
        }

        let (min_ts_index, max_ts_index) = difficulty_blocks.iter().position_minmax().into_option().expect("window is not empty");

        let min_ts = difficulty_blocks[min_ts_index].timestamp;
        let max_ts = difficulty_blocks[max_ts_index].timestamp;

        // We remove the minimal block because we want the average target for the internal window
        difficulty_blocks.swap_remove(min_ts_index);

        let difficulty_blocks_len = difficulty_blocks.len() as u64;
        let targets_sum: Uint320 =
            difficulty_blocks.into_iter().map(|diff_block| Uint320::from(Uint256::from_compact_target_bits(diff_block.bits))).sum();
        let average_target = targets_sum / difficulty_blocks_len;
        let new_target = average_target * max(max_ts - min_ts, 1) / (target_time_per_block * difficulty_blocks_len);
        Uint256::try_from(new_target.min(self.max_difficulty_target)).expect("max target fits in 256 bits").compact_target_bits()
    }

    pub fn estimate_network_hashes_per_second(&self, window: &BlockWindowHeap) -> DifficultyResult<u64> {
        const MIN_WINDOW_SIZE: usize = 1000;
        let window_size = window.len();
        if window_size < MIN_WINDOW_SIZE {
            return Err(DifficultyError::UnderMinWindowSizeAllowed(window_size, MIN_WINDOW_SIZE));
        }
        let difficulty_blocks = self.get_difficulty_blocks(window);
        let (min_ts, max_ts) =
            difficulty_blocks.iter().map(|x| x.timestamp).minmax().into_option().ok_or(DifficultyError::InsufficientWindowData(0))?;
        if min_ts == max_ts {
            return Err(DifficultyError::EmptyTimestampRange);
        }
        let window_duration = (max_ts - min_ts) / 1000; // Milliseconds to seconds
        if window_duration == 0 {
            return Ok(0);
        }

        let (min_blue_work, max_blue_work) = difficulty_blocks
            .iter()
            .map(|x| x.sortable_block.blue_work)
            .minmax()
            .into_option()
            .ok_or(DifficultyError::InsufficientWindowData(0))?;

        Ok(((max_blue_work - min_blue_work) / window_duration).as_u64())
    }
}

/// The work represented by a block of the given difficulty: `2^256 / (target + 1)`
pub fn calc_work(bits: u32) -> BlueWorkType {
    let target = Uint256::from_compact_target_bits(bits);
    // 2^256 cannot be represented, but as 2^256 >= target + 1 it equals
    // ((2^256 - target - 1) / (target + 1)) + 1, i.e. ~target / (target + 1) + 1
    let res = (!target / (target + 1)) + 1;
    res.try_into().expect("work should not exceed 2^192")
}

#[derive(Eq)]
struct DifficultyBlock {
    timestamp: u64,
    bits: u32,
    sortable_block: SortableBlock,
}

impl PartialEq for DifficultyBlock {
    fn eq(&self, other: &Self) -> bool {
        // Equal sortable blocks imply equal timestamps and bits
        self.sortable_block == other.sortable_block
    }
}

impl PartialOrd for DifficultyBlock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DifficultyBlock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp.cmp(&other.timestamp).then_with(|| self.sortable_block.cmp(&other.sortable_block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_work_is_monotone() {
        let easy = calc_work(0x207fffff);
        let hard = calc_work(0x1e7fffff);
        assert!(hard > easy);
        assert_eq!(calc_work(0x207fffff), BlueWorkType::from_u64(2));
    }
}
