//! Pruning point advancement and the pruning point UTXO set import.
//!
//! Both paths run under the consensus processing lock, so the pruning stores only need their own
//! guards against concurrent readers. The pruning point UTXO set is always the UTXO set of the
//! current pruning point: it is advanced by applying the chain diffs between the old and the new point.

use crate::{
    consensus::{
        services::{ConsensusServices, DbPruningPointManager},
        storage::ConsensusStorage,
    },
    model::{
        services::reachability::{MTReachabilityService, ReachabilityService},
        stores::{
            acceptance_data::{AcceptanceDataStore, DbAcceptanceDataStore},
            block_transactions::{BlockTransactionsStore, DbBlockTransactionsStore},
            headers::{DbHeadersStore, HeaderStoreReader},
            pruning::{DbPruningStore, PruningStore, PruningStoreReader},
            pruning_import::{DbPruningImportStore, ImportPhase, PruningImportState},
            reachability::DbReachabilityStore,
            relations::{DbRelationsStore, RelationsStoreReader},
            statuses::{DbStatusesStore, StatusesStore, StatusesStoreReader},
            tips::{DbTipsStore, TipsStore, TipsStoreReader},
            utxo_diffs::{DbUtxoDiffsStore, UtxoDiffsStore, UtxoDiffsStoreReader},
            utxo_multisets::{DbUtxoMultisetsStore, UtxoMultisetsStore},
            utxo_set::{DbUtxoSetStore, UtxoSetStore, UtxoSetStoreReader},
            virtual_state::{DbVirtualStateStore, VirtualStateStoreReader},
        },
    },
};
use kestrel_consensus_core::{
    BlockHashSet,
    blockstatus::BlockStatus::StatusHeaderOnly,
    config::Config,
    errors::pruning::{PruningImportError, PruningImportResult},
    multiset::MultisetExtensions,
    notify::{ConsensusNotification, ConsensusNotificationRoot, PruningPointUtxoSetOverrideNotification},
    pruning::PruningPointInfo,
    tx::{TransactionOutpoint, UtxoEntry},
};
use kestrel_core::{debug, info, warn};
use kestrel_database::prelude::{DB, DirectDbWriter, StagingArea, StoreResultExt, StoreResultUnitExt};
use kestrel_hashes::Hash;
use kestrel_multiset::Multiset;
use parking_lot::RwLock;
use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

/// Number of UTXO entries copied per write batch when promoting an imported set
const UTXO_COPY_BATCH_SIZE: usize = 1000;

pub struct PruningProcessor {
    // Config
    is_archival: bool,

    // DB
    db: Arc<DB>,

    // Stores
    statuses_store: Arc<DbStatusesStore>,
    relations_store: Arc<DbRelationsStore>,
    headers_store: Arc<DbHeadersStore>,
    block_transactions_store: Arc<DbBlockTransactionsStore>,
    utxo_diffs_store: Arc<DbUtxoDiffsStore>,
    utxo_multisets_store: Arc<DbUtxoMultisetsStore>,
    acceptance_data_store: Arc<DbAcceptanceDataStore>,
    pruning_point_store: Arc<RwLock<DbPruningStore>>,
    pruning_import_store: Arc<RwLock<DbPruningImportStore>>,
    body_tips_store: Arc<RwLock<DbTipsStore>>,
    virtual_state_store: Arc<RwLock<DbVirtualStateStore>>,
    virtual_utxo_store: Arc<RwLock<DbUtxoSetStore>>,
    pruning_utxo_store: Arc<RwLock<DbUtxoSetStore>>,
    imported_utxo_store: Arc<RwLock<DbUtxoSetStore>>,

    // Managers and services
    reachability_service: MTReachabilityService<DbReachabilityStore>,
    pruning_point_manager: DbPruningPointManager,

    // Notifier
    notification_root: Arc<ConsensusNotificationRoot>,
}

impl PruningProcessor {
    pub fn new(
        config: &Config,
        storage: &Arc<ConsensusStorage>,
        services: &Arc<ConsensusServices>,
        notification_root: Arc<ConsensusNotificationRoot>,
    ) -> Self {
        Self {
            is_archival: config.is_archival,

            db: storage.db.clone(),
            statuses_store: storage.statuses_store.clone(),
            relations_store: storage.relations_store.clone(),
            headers_store: storage.headers_store.clone(),
            block_transactions_store: storage.block_transactions_store.clone(),
            utxo_diffs_store: storage.utxo_diffs_store.clone(),
            utxo_multisets_store: storage.utxo_multisets_store.clone(),
            acceptance_data_store: storage.acceptance_data_store.clone(),
            pruning_point_store: storage.pruning_point_store.clone(),
            pruning_import_store: storage.pruning_import_store.clone(),
            body_tips_store: storage.body_tips_store.clone(),
            virtual_state_store: storage.virtual_state_store.clone(),
            virtual_utxo_store: storage.virtual_utxo_store.clone(),
            pruning_utxo_store: storage.pruning_utxo_store.clone(),
            imported_utxo_store: storage.imported_utxo_store.clone(),

            reachability_service: services.reachability_service.clone(),
            pruning_point_manager: services.pruning_point_manager.clone(),

            notification_root,
        }
    }

    pub fn is_importing(&self) -> bool {
        self.pruning_import_store.read().get().expect("pruning import store read").is_some()
    }

    /// Moves the pruning point to the one expected by the virtual, if it is a valid advance. Returns the new
    /// pruning point if it moved
    pub fn advance_pruning_point_if_needed(&self) -> Option<Hash> {
        if self.is_importing() {
            debug!("Pruning point advancement is deferred while a UTXO set import is in progress");
            return None;
        }

        let virtual_state = self.virtual_state_store.read().get().expect("virtual state is initialized");
        let current = self.pruning_point_store.read().get().expect("pruning point is initialized");
        let expected = self
            .pruning_point_manager
            .expected_header_pruning_point(virtual_state.ghostdag_data.to_compact(), virtual_state.daa_score)?;
        if !self.pruning_point_manager.is_valid_advance(current.pruning_point, expected) {
            return None;
        }

        self.advance_pruning_point(current, expected);
        if !self.is_archival {
            self.prune(current.pruning_point, expected);
        }
        Some(expected)
    }

    fn advance_pruning_point(&self, current: PruningPointInfo, new_pruning_point: Hash) {
        let area = StagingArea::new();

        let mut pruning_utxo_write = self.pruning_utxo_store.write();
        for chain_block in self.reachability_service.forward_chain_iterator(current.pruning_point, new_pruning_point, true).skip(1) {
            let utxo_diff = self.utxo_diffs_store.get(chain_block).expect("chain blocks above the pruning point have diffs");
            pruning_utxo_write.write_diff(&area, utxo_diff.as_ref()).expect("pruning UTXO set write");
        }

        let new_index = current.index + 1;
        let mut pruning_point_write = self.pruning_point_store.write();
        pruning_point_write
            .insert_past_pruning_point(&area, new_index, new_pruning_point)
            .idempotent()
            .expect("past pruning point write");
        pruning_point_write
            .set(&area, PruningPointInfo::new(new_pruning_point, new_pruning_point, new_index))
            .expect("pruning point write");

        area.commit_to_db(&self.db).expect("pruning point commit");
        drop(pruning_point_write);
        drop(pruning_utxo_write);

        info!("Advanced the pruning point from {} to {} (index {})", current.pruning_point, new_pruning_point, new_index);
    }

    /// Deletes the block bodies and UTXO data of blocks in the past of the new pruning point which were not
    /// already pruned by a previous advancement. Headers, relations and GHOSTDAG data are retained
    fn prune(&self, old_pruning_point: Hash, new_pruning_point: Hash) {
        let mut queue: VecDeque<Hash> =
            self.relations_store.get_parents(new_pruning_point).expect("the pruning point has relations").iter().copied().collect();
        let mut visited = BlockHashSet::new();
        let area = StagingArea::new();
        let mut pruned = 0;

        while let Some(block) = queue.pop_front() {
            if !visited.insert(block) {
                continue;
            }
            if !self.reachability_service.has_reachability_data(block) {
                continue;
            }
            if block != old_pruning_point && self.reachability_service.is_dag_ancestor_of(block, old_pruning_point) {
                continue;
            }

            if self.statuses_store.get(block).optional().expect("statuses store read").is_some_and(|status| status.has_block_body()) {
                self.block_transactions_store.delete(&area, block).expect("block transactions delete");
                self.utxo_diffs_store.delete(&area, block).expect("UTXO diffs delete");
                self.utxo_multisets_store.delete(&area, block).expect("multisets delete");
                self.acceptance_data_store.delete(&area, block).expect("acceptance data delete");
                self.statuses_store.set(&area, block, StatusHeaderOnly).expect("statuses store write");
                pruned += 1;
            }

            if let Some(parents) = self.relations_store.get_parents(block).optional().expect("relations store read") {
                queue.extend(parents.iter().copied());
            }
        }

        // Tips which fell below the pruning point can no longer be extended
        let mut body_tips_write = self.body_tips_store.write();
        let stale_tips: Vec<Hash> = body_tips_write
            .get()
            .expect("body tips are initialized")
            .iter()
            .copied()
            .filter(|&tip| tip != new_pruning_point && self.reachability_service.is_dag_ancestor_of(tip, new_pruning_point))
            .collect();
        body_tips_write.prune_tips(&area, &stale_tips).expect("body tips write");

        area.commit_to_db(&self.db).expect("pruning commit");
        drop(body_tips_write);

        debug!("Pruned the bodies of {} blocks below pruning point {}", pruned, new_pruning_point);
    }

    /// Returns a chunk of the pruning point UTXO set
    pub fn pruning_point_utxos(
        &self,
        from_outpoint: Option<TransactionOutpoint>,
        chunk_size: usize,
        skip_first: bool,
    ) -> Vec<(TransactionOutpoint, UtxoEntry)> {
        self.pruning_utxo_store.read().seek_iterator(from_outpoint, chunk_size, skip_first).expect("pruning UTXO set read")
    }

    pub fn start_import(&self) -> PruningImportResult<()> {
        let area = StagingArea::new();
        let mut import_write = self.pruning_import_store.write();
        let mut imported_utxo_write = self.imported_utxo_store.write();
        imported_utxo_write.clear(&area).expect("imported UTXO set clear");
        import_write.set(&area, &PruningImportState::started()).expect("pruning import store write");
        area.commit_to_db(&self.db).expect("import start commit");
        debug!("Started a pruning point UTXO set import");
        Ok(())
    }

    pub fn append_imported_utxos(&self, utxos: &[(TransactionOutpoint, UtxoEntry)]) -> PruningImportResult<()> {
        let mut import_write = self.pruning_import_store.write();
        let mut state = match import_write.get().expect("pruning import store read") {
            Some(state) if state.phase == ImportPhase::Streaming => state,
            _ => return Err(PruningImportError::ImportNotStarted),
        };

        let mut imported_utxo_write = self.imported_utxo_store.write();
        let mut seen = HashSet::with_capacity(utxos.len());
        for (outpoint, entry) in utxos.iter() {
            if !seen.insert(*outpoint) || imported_utxo_write.get(outpoint).optional().expect("imported UTXO set read").is_some() {
                return Err(PruningImportError::DuplicateImportedOutpoint(outpoint.to_string()));
            }
            state.multiset.add_utxo(outpoint, entry);
        }
        state.imported_count += utxos.len() as u64;

        let area = StagingArea::new();
        imported_utxo_write.write_many(&area, utxos).expect("imported UTXO set write");
        import_write.set(&area, &state).expect("pruning import store write");
        area.commit_to_db(&self.db).expect("import chunk commit");
        Ok(())
    }

    /// Verifies the imported set against the header commitment of `pruning_point` and promotes it to the
    /// pruning point and virtual UTXO sets. Returns the multiset of the imported set
    pub fn finish_import(&self, pruning_point: Hash) -> PruningImportResult<Multiset> {
        let mut import_write = self.pruning_import_store.write();
        let mut state = import_write.get().expect("pruning import store read").ok_or(PruningImportError::ImportNotStarted)?;

        let header = self
            .headers_store
            .get_header(pruning_point)
            .optional()
            .expect("headers store read")
            .ok_or(PruningImportError::MissingPruningPointHeader(pruning_point))?;
        let imported_commitment = state.multiset.finalize();
        if imported_commitment != header.utxo_commitment {
            return Err(PruningImportError::ImportedMultisetHashMismatch(imported_commitment, header.utxo_commitment));
        }

        // Persist the verified phase first, so a crash during the copy resumes it on restart
        state.phase = ImportPhase::Finishing;
        state.pruning_point = Some(pruning_point);
        import_write.set(DirectDbWriter::new(&self.db), &state).expect("pruning import store write");

        self.promote_imported_set();
        import_write.clear(DirectDbWriter::new(&self.db)).expect("pruning import store write");
        drop(import_write);

        info!("Imported {} UTXOs of pruning point {}", state.imported_count, pruning_point);
        Ok(state.multiset)
    }

    pub fn notify_utxo_set_override(&self, pruning_point: Hash) {
        self.notification_root
            .notify(ConsensusNotification::PruningPointUtxoSetOverride(PruningPointUtxoSetOverrideNotification { pruning_point }));
    }

    /// Resolves an import interrupted by a shutdown. A verified import is completed and its pruning point
    /// and multiset are returned. An import still streaming is discarded
    pub fn recover_import(&self) -> Option<(Hash, Multiset)> {
        let mut import_write = self.pruning_import_store.write();
        let state = import_write.get().expect("pruning import store read")?;
        let result = match (state.phase, state.pruning_point) {
            (ImportPhase::Finishing, Some(pruning_point)) => {
                info!("Resuming the promotion of the imported UTXO set of pruning point {}", pruning_point);
                self.promote_imported_set();
                Some((pruning_point, state.multiset))
            }
            _ => {
                warn!("Discarding an incomplete pruning point UTXO set import of {} entries", state.imported_count);
                self.imported_utxo_store.write().clear(DirectDbWriter::new(&self.db)).expect("imported UTXO set clear");
                None
            }
        };
        import_write.clear(DirectDbWriter::new(&self.db)).expect("pruning import store write");
        result
    }

    fn promote_imported_set(&self) {
        let imported_utxo_read = self.imported_utxo_store.read();
        let mut pruning_utxo_write = self.pruning_utxo_store.write();
        let mut virtual_utxo_write = self.virtual_utxo_store.write();
        pruning_utxo_write.clear(DirectDbWriter::new(&self.db)).expect("pruning UTXO set clear");
        virtual_utxo_write.clear(DirectDbWriter::new(&self.db)).expect("virtual UTXO set clear");

        let mut from = None;
        loop {
            let chunk = imported_utxo_read.seek_iterator(from, UTXO_COPY_BATCH_SIZE, from.is_some()).expect("imported UTXO set read");
            if chunk.is_empty() {
                break;
            }
            let area = StagingArea::new();
            pruning_utxo_write.write_many(&area, &chunk).expect("pruning UTXO set write");
            virtual_utxo_write.write_many(&area, &chunk).expect("virtual UTXO set write");
            area.commit_to_db(&self.db).expect("UTXO set copy commit");
            from = chunk.last().map(|(outpoint, _)| *outpoint);
        }
        drop(virtual_utxo_write);
        drop(pruning_utxo_write);
        drop(imported_utxo_read);

        self.imported_utxo_store.write().clear(DirectDbWriter::new(&self.db)).expect("imported UTXO set clear");
    }
}
