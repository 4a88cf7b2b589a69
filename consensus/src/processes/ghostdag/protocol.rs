use std::sync::Arc;

use kestrel_consensus_core::{
    BlockHashMap, BlueWorkType, HashMapCustomHasher, KType,
    blockhash::{BlockHashExtensions, NONE, ORIGIN},
};
use kestrel_hashes::Hash;

use crate::{
    model::{
        services::reachability::ReachabilityService,
        stores::{
            ghostdag::{GhostdagData, GhostdagStoreReader},
            headers::HeaderStoreReader,
            relations::RelationsStoreReader,
        },
    },
    processes::difficulty::calc_work,
};

use super::ordering::SortableBlock;

/// Computes GHOSTDAG data: the selected parent, the blue/red coloring of the mergeset, blue score and blue work.
///
/// The blue work of a block covers its whole blue past plus its own work, except for genesis (and
/// the virtual genesis `ORIGIN`) which carry zero work. Own work depends on the block's difficulty,
/// so [`GhostdagManager::ghostdag`] leaves it out and callers add it once the bits are known.
#[derive(Clone)]
pub struct GhostdagManager<T: GhostdagStoreReader, S: RelationsStoreReader, U: ReachabilityService, V: HeaderStoreReader> {
    genesis_hash: Hash,
    pub(super) ghostdag_store: Arc<T>,
    pub(super) relations_store: Arc<S>,
    pub(super) headers_store: Arc<V>,
    pub(super) reachability_service: U,
}

/// The coloring state of a blue candidate while walking the selected chain of the new block
enum ColoringState {
    Blue,
    Red,
    Pending,
}

#[derive(Debug)]
enum ColoringOutput {
    Blue(KType, BlockHashMap<KType>), // (blue anticone size, map of blue anticone sizes for each affected blue)
    Red,
}

impl<T: GhostdagStoreReader, S: RelationsStoreReader, U: ReachabilityService, V: HeaderStoreReader> GhostdagManager<T, S, U, V> {
    pub fn new(
        genesis_hash: Hash,
        ghostdag_store: Arc<T>,
        relations_store: Arc<S>,
        headers_store: Arc<V>,
        reachability_service: U,
    ) -> Self {
        Self { genesis_hash, ghostdag_store, relations_store, headers_store, reachability_service }
    }

    pub fn genesis_ghostdag_data(&self) -> GhostdagData {
        GhostdagData::new_root(BlueWorkType::ZERO, ORIGIN)
    }

    pub fn origin_ghostdag_data(&self) -> GhostdagData {
        GhostdagData::new_root(BlueWorkType::ZERO, NONE)
    }

    pub fn find_selected_parent(&self, parents: impl IntoIterator<Item = Hash>) -> Hash {
        parents
            .into_iter()
            .map(|parent| SortableBlock::new(parent, self.ghostdag_store.get_blue_work(parent).expect("parents have ghostdag data")))
            .max()
            .expect("expecting at least one parent")
            .hash
    }

    /// Returns the preferred of the two blocks: the one with higher blue work, tie-breaking by hash
    pub fn choose_selected_parent(&self, a: Hash, b: Hash) -> Hash {
        self.find_selected_parent([a, b])
    }

    /// Runs the GHOSTDAG protocol over `parents` with parameter `k`, excluding the work of the new block itself.
    ///
    /// The mergeset is colored in ascending blue work order. A candidate is blue iff adding it keeps the
    /// blue set a k-cluster: its blue anticone is at most `k`, and it does not push the blue anticone of
    /// any existing blue beyond `k`
    pub fn ghostdag(&self, parents: &[Hash], k: KType) -> GhostdagData {
        assert!(!parents.is_empty(), "genesis must be added via a call to init");

        let selected_parent = self.find_selected_parent(parents.iter().copied());
        let mut new_block_data = GhostdagData::new_with_selected_parent(selected_parent, k);
        let ordered_mergeset = self.ordered_mergeset_without_selected_parent(selected_parent, parents);

        for blue_candidate in ordered_mergeset.iter().copied() {
            let coloring = self.check_blue_candidate(&new_block_data, blue_candidate, k);
            if let ColoringOutput::Blue(blue_anticone_size, blues_anticone_sizes) = coloring {
                // No need to check for the k-cluster violation again, `check_blue_candidate` does so
                new_block_data.add_blue(blue_candidate, blue_anticone_size, &blues_anticone_sizes);
            } else {
                new_block_data.add_red(blue_candidate);
            }
        }

        let selected_parent_data = self.ghostdag_store.get_compact_data(selected_parent).expect("selected parent has ghostdag data");
        let blue_score = selected_parent_data.blue_score + new_block_data.mergeset_blues.len() as u64;
        let added_blue_work: BlueWorkType = new_block_data
            .mergeset_blues
            .iter()
            .skip(1) // The selected parent's own work is already part of its blue work
            .copied()
            .map(|hash| self.block_work(hash))
            .sum();

        new_block_data.finalize_score_and_work(blue_score, selected_parent_data.blue_work + added_blue_work);
        new_block_data
    }

    /// Adds the work of the block described by `data` once its difficulty bits are known
    pub fn add_own_work(&self, data: &mut GhostdagData, bits: u32) {
        data.blue_work = data.blue_work + calc_work(bits);
    }

    fn block_work(&self, hash: Hash) -> BlueWorkType {
        if hash == self.genesis_hash || hash.is_origin() {
            return BlueWorkType::ZERO;
        }
        calc_work(self.headers_store.get_bits(hash).expect("blue blocks have headers"))
    }

    fn check_blue_candidate_with_chain_block(
        &self,
        new_block_data: &GhostdagData,
        chain_block: ChainBlock,
        blue_candidate: Hash,
        candidate_blues_anticone_sizes: &mut BlockHashMap<KType>,
        candidate_blue_anticone_size: &mut KType,
        k: KType,
    ) -> ColoringState {
        // If blue_candidate is in the future of chain_block, all remaining blues are in the past of
        // chain_block and thus in the past of blue_candidate, so its anticone cannot grow further
        if let Some(hash) = chain_block.hash {
            if self.reachability_service.is_dag_ancestor_of(hash, blue_candidate) {
                return ColoringState::Blue;
            }
        }

        for block in chain_block.data.mergeset_blues.iter().copied() {
            // Skip blocks that exist in the past of blue_candidate
            if self.reachability_service.is_dag_ancestor_of(block, blue_candidate) {
                continue;
            }

            let block_anticone_size = self.blue_anticone_size(block, new_block_data);
            candidate_blues_anticone_sizes.insert(block, block_anticone_size);

            *candidate_blue_anticone_size += 1;
            if *candidate_blue_anticone_size > k {
                // k-cluster violation: the candidate's blue anticone exceeded k
                return ColoringState::Red;
            }

            if block_anticone_size == k {
                // k-cluster violation: a block in the candidate's blue anticone already has k blue blocks in its own anticone
                return ColoringState::Red;
            }

            assert!(block_anticone_size <= k, "found blue anticone larger than K");
        }

        ColoringState::Pending
    }

    /// Returns the blue anticone size of `block` from the worldview of `context`.
    /// Expects `block` to be in the blue set of `context`
    fn blue_anticone_size(&self, block: Hash, context: &GhostdagData) -> KType {
        let mut current_blues_anticone_sizes = Arc::clone(&context.blues_anticone_sizes);
        let mut current_selected_parent = context.selected_parent;
        loop {
            if let Some(size) = current_blues_anticone_sizes.get(&block) {
                return *size;
            }
            if current_selected_parent == self.genesis_hash || current_selected_parent.is_origin() {
                panic!("block {block} is not in blue set of the given context");
            }
            current_blues_anticone_sizes = self
                .ghostdag_store
                .get_blues_anticone_sizes(current_selected_parent)
                .expect("chain blocks have ghostdag data");
            current_selected_parent =
                self.ghostdag_store.get_selected_parent(current_selected_parent).expect("chain blocks have ghostdag data");
        }
    }

    fn check_blue_candidate(&self, new_block_data: &GhostdagData, blue_candidate: Hash, k: KType) -> ColoringOutput {
        // The maximum length of new_block_data.mergeset_blues can be K+1 because
        // it contains the selected parent
        if new_block_data.mergeset_blues.len() as KType == k + 1 {
            return ColoringOutput::Red;
        }

        let mut candidate_blues_anticone_sizes: BlockHashMap<KType> = BlockHashMap::with_capacity(k as usize);
        // Iterate over all blocks in the blue past of the new block that are not in the past
        // of blue_candidate, and check for each one of them if blue_candidate potentially
        // enlarges their blue anticone to be over K, or that they enlarge the blue anticone
        // of blue_candidate to be over K
        let mut chain_block = ChainBlock { hash: None, data: new_block_data.clone().into() };
        let mut candidate_blue_anticone_size: KType = 0;

        loop {
            let state = self.check_blue_candidate_with_chain_block(
                new_block_data,
                chain_block.clone(),
                blue_candidate,
                &mut candidate_blues_anticone_sizes,
                &mut candidate_blue_anticone_size,
                k,
            );

            match state {
                ColoringState::Blue => return ColoringOutput::Blue(candidate_blue_anticone_size, candidate_blues_anticone_sizes),
                ColoringState::Red => return ColoringOutput::Red,
                ColoringState::Pending => (), // continue looping
            }

            let selected_parent = chain_block.data.selected_parent;
            chain_block = ChainBlock {
                hash: Some(selected_parent),
                data: self.ghostdag_store.get_data(selected_parent).expect("chain blocks have ghostdag data"),
            };
        }
    }
}

/// A block on the selected chain of the block being colored. `hash` is `None` for the new block itself
#[derive(Clone)]
struct ChainBlock {
    hash: Option<Hash>,
    data: Arc<GhostdagData>,
}
