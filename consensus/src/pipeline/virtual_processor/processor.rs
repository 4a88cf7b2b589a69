use super::utxo_validation::UtxoProcessingContext;
use crate::{
    consensus::{
        services::{
            ConsensusServices, DbBlockDepthManager, DbDagTraversalManager, DbGhostdagManager, DbParentsManager, DbPruningPointManager,
            DbWindowManager,
        },
        storage::ConsensusStorage,
    },
    model::{
        services::reachability::{MTReachabilityService, ReachabilityService},
        stores::{
            acceptance_data::{AcceptanceDataStore, DbAcceptanceDataStore},
            block_transactions::DbBlockTransactionsStore,
            daa::DbDaaStore,
            ghostdag::{DbGhostdagStore, GhostdagData, GhostdagStoreReader},
            headers::{DbHeadersStore, HeaderStoreReader},
            pruning::{DbPruningStore, PruningStore, PruningStoreReader},
            reachability::DbReachabilityStore,
            selected_chain::{DbSelectedChainStore, SelectedChainStore},
            statuses::{DbStatusesStore, StatusesStore, StatusesStoreReader},
            tips::{DbTipsStore, TipsStore, TipsStoreReader},
            utxo_diffs::{DbUtxoDiffsStore, UtxoDiffsStore, UtxoDiffsStoreReader},
            utxo_multisets::{DbUtxoMultisetsStore, UtxoMultisetsStore, UtxoMultisetsStoreReader},
            utxo_set::{DbUtxoSetStore, UtxoSetStore},
            virtual_state::{DbVirtualStateStore, VirtualState, VirtualStateStore, VirtualStateStoreReader},
        },
    },
    pipeline::ProcessingCounters,
    processes::{coinbase::CoinbaseManager, ghostdag::ordering::SortableBlock, transaction_validator::TransactionValidator},
};
use itertools::Itertools;
use kestrel_consensus_core::{
    BlockHashSet, ChainPath,
    blockhash::BlockHashExtensions,
    blockstatus::BlockStatus::{self, StatusDisqualifiedFromChain, StatusUTXOPendingVerification, StatusUTXOValid},
    config::{Config, genesis::GenesisBlock},
    notify::{
        ConsensusNotification, ConsensusNotificationRoot, NewBlockTemplateNotification, VirtualChainChangedNotification,
        VirtualDaaScoreChangedNotification,
    },
    pruning::PruningPointInfo,
    utxo::{
        utxo_diff::UtxoDiff,
        utxo_view::{UtxoView, compose_one_diff_layer},
    },
};
use kestrel_core::{debug, info, trace};
use kestrel_database::prelude::{DB, StagingArea, StoreResultExt, StoreResultUnitExt};
use kestrel_hashes::Hash;
use kestrel_multiset::Multiset;
use parking_lot::RwLock;
use std::{
    collections::BinaryHeap,
    sync::{Arc, atomic::Ordering},
};

pub struct VirtualStateProcessor {
    // Config
    pub(super) genesis: GenesisBlock,

    // DB
    db: Arc<DB>,

    // Stores
    pub(super) statuses_store: Arc<DbStatusesStore>,
    pub(super) ghostdag_store: Arc<DbGhostdagStore>,
    pub(super) headers_store: Arc<DbHeadersStore>,
    pub(super) daa_excluded_store: Arc<DbDaaStore>,
    pub(super) block_transactions_store: Arc<DbBlockTransactionsStore>,
    utxo_diffs_store: Arc<DbUtxoDiffsStore>,
    pub(super) utxo_multisets_store: Arc<DbUtxoMultisetsStore>,
    acceptance_data_store: Arc<DbAcceptanceDataStore>,
    pub(super) pruning_point_store: Arc<RwLock<DbPruningStore>>,
    body_tips_store: Arc<RwLock<DbTipsStore>>,
    selected_chain_store: Arc<RwLock<DbSelectedChainStore>>,
    pub(super) virtual_state_store: Arc<RwLock<DbVirtualStateStore>>,
    pub(super) virtual_utxo_store: Arc<RwLock<DbUtxoSetStore>>,

    // Managers and services
    pub(super) reachability_service: MTReachabilityService<DbReachabilityStore>,
    pub(super) ghostdag_manager: DbGhostdagManager,
    pub(super) dag_traversal_manager: DbDagTraversalManager,
    pub(super) window_manager: DbWindowManager,
    pub(super) coinbase_manager: CoinbaseManager,
    pub(super) transaction_validator: TransactionValidator,
    pub(super) pruning_point_manager: DbPruningPointManager,
    pub(super) parents_manager: DbParentsManager,
    depth_manager: DbBlockDepthManager,

    // Notifier
    notification_root: Arc<ConsensusNotificationRoot>,

    // Counters
    counters: Arc<ProcessingCounters>,
}

impl VirtualStateProcessor {
    pub fn new(
        config: &Config,
        storage: &Arc<ConsensusStorage>,
        services: &Arc<ConsensusServices>,
        notification_root: Arc<ConsensusNotificationRoot>,
        counters: Arc<ProcessingCounters>,
    ) -> Self {
        Self {
            genesis: config.genesis.clone(),

            db: storage.db.clone(),
            statuses_store: storage.statuses_store.clone(),
            ghostdag_store: storage.ghostdag_store.clone(),
            headers_store: storage.headers_store.clone(),
            daa_excluded_store: storage.daa_excluded_store.clone(),
            block_transactions_store: storage.block_transactions_store.clone(),
            utxo_diffs_store: storage.utxo_diffs_store.clone(),
            utxo_multisets_store: storage.utxo_multisets_store.clone(),
            acceptance_data_store: storage.acceptance_data_store.clone(),
            pruning_point_store: storage.pruning_point_store.clone(),
            body_tips_store: storage.body_tips_store.clone(),
            selected_chain_store: storage.selected_chain_store.clone(),
            virtual_state_store: storage.virtual_state_store.clone(),
            virtual_utxo_store: storage.virtual_utxo_store.clone(),

            reachability_service: services.reachability_service.clone(),
            ghostdag_manager: services.ghostdag_manager.clone(),
            dag_traversal_manager: services.dag_traversal_manager.clone(),
            window_manager: services.window_manager.clone(),
            coinbase_manager: services.coinbase_manager.clone(),
            transaction_validator: services.transaction_validator.clone(),
            pruning_point_manager: services.pruning_point_manager.clone(),
            parents_manager: services.parents_manager.clone(),
            depth_manager: services.depth_manager.clone(),

            notification_root,
            counters,
        }
    }

    /// Resolves pending chain candidates and moves the virtual on top of the best UTXO valid tip
    pub fn resolve_virtual(&self) {
        self.update_virtual(false);
    }

    fn update_virtual(&self, force: bool) {
        let pruning_point = self.pruning_point_store.read().pruning_point().expect("pruning point is initialized");
        let prev_state = self.virtual_state_store.read().get().expect("virtual state is initialized");
        let prev_sink = prev_state.sink();
        let tips = self.body_tips_store.read().get().expect("body tips are initialized");

        let new_sink = self.find_new_sink(&tips, prev_sink, pruning_point, &prev_state);
        let (virtual_parents, virtual_ghostdag_data) = self.pick_virtual_parents(new_sink, &tips, pruning_point);
        if !force && new_sink == prev_sink && virtual_parents == prev_state.parents {
            trace!("Virtual is unchanged");
            return;
        }

        let virtual_utxo_read = self.virtual_utxo_store.read();
        let sink_diff = self.utxo_diff_from_virtual(&prev_state, new_sink);
        let sink_view = compose_one_diff_layer(&*virtual_utxo_read, &sink_diff);

        let virtual_ghostdag_data = Arc::new(virtual_ghostdag_data);
        let daa_window = self.window_manager.block_daa_window(&virtual_ghostdag_data);
        let bits = self.window_manager.calculate_difficulty_bits(&virtual_ghostdag_data, &daa_window);
        let (past_median_time, _) = self.window_manager.calc_past_median_time(&virtual_ghostdag_data);

        let sink_multiset = self.utxo_multisets_store.get(new_sink).expect("UTXO valid blocks have a multiset");
        let mut ctx = UtxoProcessingContext::new(virtual_ghostdag_data.clone(), sink_multiset);
        self.calculate_utxo_state(&mut ctx, &sink_view, daa_window.daa_score);
        drop(sink_view);
        drop(virtual_utxo_read);

        // The diff to write on top of the materialized virtual UTXO set
        let mut virtual_set_diff = sink_diff;
        virtual_set_diff.with_diff_in_place(&ctx.mergeset_diff).expect("the virtual diff composes over the sink");

        let new_state = Arc::new(VirtualState::new(
            virtual_parents,
            daa_window.daa_score,
            bits,
            past_median_time,
            ctx.multiset,
            ctx.mergeset_diff,
            ctx.accepted_tx_ids,
            ctx.mergeset_rewards,
            daa_window.mergeset_non_daa,
            (*virtual_ghostdag_data).clone(),
        ));
        let chain_path = self.dag_traversal_manager.calculate_chain_path(prev_sink, new_sink);

        self.commit_virtual_state(new_state.clone(), &virtual_set_diff, &chain_path);

        if prev_sink != new_sink {
            debug!("Virtual sink moved from {} to {}", prev_sink, new_sink);
        }
        self.counters.chain_block_counts.fetch_add(chain_path.added.len() as u64, Ordering::Relaxed);

        if !chain_path.added.is_empty() || !virtual_set_diff.is_empty() {
            self.notification_root.notify(ConsensusNotification::VirtualChainChanged(VirtualChainChangedNotification {
                added_chain_block_hashes: Arc::new(chain_path.added),
                removed_chain_block_hashes: Arc::new(chain_path.removed),
                virtual_utxo_diff: Arc::new(virtual_set_diff),
            }));
        }
        if new_state.daa_score != prev_state.daa_score {
            self.notification_root.notify(ConsensusNotification::VirtualDaaScoreChanged(VirtualDaaScoreChangedNotification {
                virtual_daa_score: new_state.daa_score,
            }));
        }
        self.notification_root.notify(ConsensusNotification::NewBlockTemplate(NewBlockTemplateNotification {}));
    }

    fn commit_virtual_state(&self, new_state: Arc<VirtualState>, virtual_set_diff: &UtxoDiff, chain_path: &ChainPath) {
        let area = StagingArea::new();

        // Note we need to keep the lock write guards until the area is committed
        let mut virtual_utxo_write = self.virtual_utxo_store.write();
        virtual_utxo_write.write_diff(&area, virtual_set_diff).expect("virtual UTXO write");
        let mut selected_chain_write = self.selected_chain_store.write();
        selected_chain_write.apply_changes(&area, chain_path).expect("selected chain write");
        let mut virtual_state_write = self.virtual_state_store.write();
        virtual_state_write.set(&area, new_state).expect("virtual state write");

        area.commit_to_db(&self.db).expect("virtual commit");
        drop(virtual_state_write);
        drop(selected_chain_write);
        drop(virtual_utxo_write);
    }

    /// Picks the candidate with the highest blue work whose whole chain down to the pruning point is UTXO valid.
    /// Pending chain blocks are verified along the way
    fn find_new_sink(&self, tips: &BlockHashSet, prev_sink: Hash, pruning_point: Hash, prev_state: &VirtualState) -> Hash {
        let mut candidates: BinaryHeap<SortableBlock> = tips
            .iter()
            .copied()
            .chain(std::iter::once(prev_sink))
            .unique()
            .map(|hash| SortableBlock::new(hash, self.ghostdag_store.get_blue_work(hash).expect("tips have ghostdag data")))
            .collect();

        while let Some(candidate) = candidates.pop() {
            match self.resolve_chain_candidate(candidate.hash, pruning_point, prev_state) {
                Some(highest_valid) if highest_valid == candidate.hash => return candidate.hash,
                Some(highest_valid) => {
                    // Part of the chain was disqualified, the valid remainder competes as any other candidate
                    let blue_work = self.ghostdag_store.get_blue_work(highest_valid).expect("chain blocks have ghostdag data");
                    candidates.push(SortableBlock::new(highest_valid, blue_work));
                }
                None => {}
            }
        }

        // The previous sink is always a UTXO valid chain descendant of the pruning point
        prev_sink
    }

    /// Verifies the pending blocks on the selected chain of `candidate`, oldest first. Returns the highest
    /// UTXO valid block of that chain, or `None` if the candidate cannot serve as the sink
    pub(super) fn resolve_chain_candidate(&self, candidate: Hash, pruning_point: Hash, prev_state: &VirtualState) -> Option<Hash> {
        if !self.reachability_service.is_chain_ancestor_of(pruning_point, candidate) {
            return None;
        }

        let mut pending = Vec::new();
        let mut current = candidate;
        let base = loop {
            match self.statuses_store.get(current).optional().expect("statuses store read") {
                Some(StatusUTXOValid) => break current,
                Some(StatusUTXOPendingVerification) => {
                    pending.push(current);
                    current = self.ghostdag_store.get_selected_parent(current).expect("chain blocks have ghostdag data");
                }
                Some(StatusDisqualifiedFromChain) => {
                    // A block whose chain is disqualified is disqualified as well
                    self.disqualify(&pending);
                    return None;
                }
                _ => return None, // The chain reaches a block without a body
            }
        };
        if pending.is_empty() {
            return Some(base);
        }

        let virtual_utxo_read = self.virtual_utxo_store.read();
        let mut accumulated_diff = self.utxo_diff_from_virtual(prev_state, base);
        let mut highest_valid = base;
        while let Some(block) = pending.pop() {
            let result = {
                let selected_parent_view = compose_one_diff_layer(&*virtual_utxo_read, &accumulated_diff);
                self.verify_chain_block(block, &selected_parent_view)
            };
            match result {
                Some(ctx) => {
                    accumulated_diff.with_diff_in_place(&ctx.mergeset_diff).expect("chain diffs compose");
                    highest_valid = block;
                }
                None => {
                    // `block` was disqualified on verification, its chain descendants inherit that
                    self.disqualify(&pending);
                    return Some(highest_valid);
                }
            }
        }
        Some(highest_valid)
    }

    /// Verifies the UTXO state of a single chain block and commits the outcome. Returns the processing
    /// context if the block is UTXO valid
    fn verify_chain_block<V: UtxoView + Sync>(&self, block: Hash, selected_parent_view: &V) -> Option<UtxoProcessingContext> {
        let header = self.headers_store.get_header(block).expect("chain blocks have headers");
        let ghostdag_data = self.ghostdag_store.get_data(block).expect("chain blocks have ghostdag data");
        let selected_parent = ghostdag_data.selected_parent;
        let selected_parent_multiset = self.utxo_multisets_store.get(selected_parent).expect("UTXO valid blocks have a multiset");

        let mut ctx = UtxoProcessingContext::new(ghostdag_data, selected_parent_multiset);
        self.calculate_utxo_state(&mut ctx, selected_parent_view, header.daa_score);

        // The diff is kept whatever the outcome, so that every resolved block extends the diff chain
        let area = StagingArea::new();
        self.utxo_diffs_store.insert(&area, block, Arc::new(ctx.mergeset_diff.clone()), selected_parent).expect("UTXO diffs write");
        if let Err(err) = self.verify_expected_utxo_state(&ctx, selected_parent_view, &header) {
            info!("Block {} is disqualified from the selected chain: {}", block, err);
            self.statuses_store.set(&area, block, StatusDisqualifiedFromChain).expect("statuses store write");
            area.commit_to_db(&self.db).expect("disqualified block commit");
            return None;
        }

        self.utxo_multisets_store.insert(&area, block, ctx.multiset).expect("multisets write");
        self.acceptance_data_store
            .insert(&area, block, Arc::new(ctx.mergeset_acceptance_data.clone()))
            .idempotent()
            .expect("acceptance data write");
        self.statuses_store.set(&area, block, StatusUTXOValid).expect("statuses store write");
        area.commit_to_db(&self.db).expect("chain block commit");

        trace!("Chain block {} is UTXO valid", block);
        Some(ctx)
    }

    fn disqualify(&self, blocks: &[Hash]) {
        if blocks.is_empty() {
            return;
        }
        let area = StagingArea::new();
        for &block in blocks {
            self.statuses_store.set(&area, block, StatusDisqualifiedFromChain).expect("statuses store write");
        }
        area.commit_to_db(&self.db).expect("disqualification commit");
    }

    /// Returns the diff leading from the materialized virtual UTXO set to the UTXO set of `target`, which
    /// must be a UTXO valid block on a chain sharing the pruning point with the current sink
    pub(super) fn utxo_diff_from_virtual(&self, state: &VirtualState, target: Hash) -> UtxoDiff {
        let sink = state.sink();
        let path = self.dag_traversal_manager.calculate_chain_path(sink, target);
        let fork = match path.added.first() {
            Some(&first) => self.utxo_diffs_store.get_diff_base(first).expect("chain blocks above the pruning point have diffs"),
            None => target,
        };

        let mut diff = state.utxo_diff.inverted();
        for block_diff in self.diff_chain(sink, fork).iter().rev() {
            diff.with_diff_in_place(&block_diff.as_reversed()).expect("chain diffs compose");
        }
        for block_diff in self.diff_chain(target, fork) {
            diff.with_diff_in_place(block_diff.as_ref()).expect("chain diffs compose");
        }
        diff
    }

    /// Collects the diffs leading from `root` to `block` by following diff bases, oldest first. `root` must be
    /// reachable from `block` through diff bases
    pub(super) fn diff_chain(&self, block: Hash, root: Hash) -> Vec<Arc<UtxoDiff>> {
        let mut diffs = Vec::new();
        let mut current = block;
        while current != root {
            diffs.push(self.utxo_diffs_store.get(current).expect("resolved blocks above the pruning point have diffs"));
            current = self.utxo_diffs_store.get_diff_base(current).expect("resolved blocks above the pruning point have diff bases");
        }
        diffs.reverse();
        diffs
    }

    /// The sink is always the selected parent of the virtual. Other tips are merged in descending blue work
    /// order as long as they keep the virtual within the parents budget, the mergeset size limit and the merge depth bound
    fn pick_virtual_parents(&self, sink: Hash, tips: &BlockHashSet, pruning_point: Hash) -> (Vec<Hash>, GhostdagData) {
        let version = self.window_manager.block_version_for_selected_parent(sink);
        let sink_block = SortableBlock::new(sink, self.ghostdag_store.get_blue_work(sink).expect("the sink has ghostdag data"));

        let mut parents = vec![sink];
        let mut ghostdag_data = self.ghostdag_manager.ghostdag(&parents, version.ghostdag_k);
        let sink_daa_score = self.headers_store.get_daa_score(sink).expect("the sink has a header");
        let merge_depth_root = self.depth_manager.calc_merge_depth_root(&ghostdag_data, sink_daa_score, pruning_point);

        let candidates = tips
            .iter()
            .copied()
            .filter(|&tip| tip != sink)
            .filter(|&tip| {
                self.statuses_store
                    .get(tip)
                    .optional()
                    .expect("statuses store read")
                    .is_some_and(|status| status.is_utxo_valid_or_pending())
            })
            .map(|tip| SortableBlock::new(tip, self.ghostdag_store.get_blue_work(tip).expect("tips have ghostdag data")))
            .filter(|tip| *tip < sink_block)
            .sorted()
            .rev();

        for candidate in candidates {
            if parents.len() >= version.max_block_parents as usize {
                break;
            }
            if !merge_depth_root.is_origin() && !self.reachability_service.is_dag_ancestor_of(merge_depth_root, candidate.hash) {
                trace!("Tip {} is below the virtual merge depth root and is not merged", candidate.hash);
                continue;
            }
            parents.push(candidate.hash);
            let candidate_ghostdag_data = self.ghostdag_manager.ghostdag(&parents, version.ghostdag_k);
            if candidate_ghostdag_data.mergeset_size() as u64 > version.mergeset_size_limit {
                parents.pop();
                continue;
            }
            ghostdag_data = candidate_ghostdag_data;
        }

        (parents, ghostdag_data)
    }

    /// Installs `pruning_point` as the root of the UTXO valid chain: the virtual UTXO set is expected to hold its
    /// UTXO set already, and `multiset` is its commitment
    pub fn init_on_pruning_point(&self, pruning_point: Hash, multiset: Multiset) {
        let header = self.headers_store.get_header(pruning_point).expect("the pruning point has a header");
        let ghostdag_data = self.ghostdag_store.get_data(pruning_point).expect("the pruning point has ghostdag data");
        let mut virtual_ghostdag_data = GhostdagData::new_with_selected_parent(pruning_point, 0);
        virtual_ghostdag_data.finalize_score_and_work(ghostdag_data.blue_score, ghostdag_data.blue_work);

        let area = StagingArea::new();
        self.utxo_multisets_store.insert(&area, pruning_point, multiset).expect("multisets write");
        self.statuses_store.set(&area, pruning_point, StatusUTXOValid).expect("statuses store write");

        let mut body_tips_write = self.body_tips_store.write();
        body_tips_write.init(&area, &[pruning_point]).expect("body tips write");
        let mut selected_chain_write = self.selected_chain_store.write();
        selected_chain_write.init_with_pruning_point(&area, pruning_point).expect("selected chain write");
        let mut virtual_state_write = self.virtual_state_store.write();
        virtual_state_write
            .set(
                &area,
                Arc::new(VirtualState::from_pruning_point(
                    pruning_point,
                    header.daa_score,
                    header.bits,
                    header.timestamp,
                    multiset,
                    virtual_ghostdag_data,
                )),
            )
            .expect("virtual state write");

        area.commit_to_db(&self.db).expect("pruning point root commit");
        drop(virtual_state_write);
        drop(selected_chain_write);
        drop(body_tips_write);

        // Accept the pruning point itself into a proper virtual
        self.update_virtual(true);
    }

    /// Writes the UTXO state of genesis (an empty UTXO set) and builds the first virtual on top of it
    pub fn process_genesis(&self) {
        let genesis_hash = self.genesis.hash();
        let area = StagingArea::new();
        self.acceptance_data_store.insert(&area, genesis_hash, Arc::new(Vec::new())).idempotent().expect("acceptance data write");
        let mut pruning_point_write = self.pruning_point_store.write();
        pruning_point_write.insert_past_pruning_point(&area, 0, genesis_hash).idempotent().expect("past pruning point write");
        pruning_point_write.set(&area, PruningPointInfo::from_genesis(genesis_hash)).expect("pruning point write");
        area.commit_to_db(&self.db).expect("genesis commit");
        drop(pruning_point_write);

        self.init_on_pruning_point(genesis_hash, Multiset::new());
        debug!("Initialized the virtual state on top of genesis {}", genesis_hash);
    }

    pub fn virtual_state(&self) -> Arc<VirtualState> {
        self.virtual_state_store.read().get().expect("virtual state is initialized")
    }

    pub fn block_status(&self, hash: Hash) -> Option<BlockStatus> {
        self.statuses_store.get(hash).optional().expect("statuses store read")
    }
}
