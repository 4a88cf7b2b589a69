pub mod factory;
pub mod proxy;
pub mod services;
pub mod storage;
pub mod test_consensus;

use self::{services::ConsensusServices, storage::ConsensusStorage};
use crate::{
    model::{
        services::reachability::ReachabilityService,
        stores::{
            acceptance_data::AcceptanceDataStoreReader, block_transactions::BlockTransactionsStoreReader,
            ghostdag::GhostdagStoreReader, headers::HeaderStoreReader, headers_selected_tip::HeadersSelectedTipStoreReader,
            manifest::ConsensusManifest, pruning::PruningStoreReader, relations::RelationsStoreReader,
            selected_chain::SelectedChainStoreReader, statuses::StatusesStoreReader, tips::TipsStoreReader,
        },
    },
    pipeline::{
        ProcessingCounters, body_processor::BlockBodyProcessor, header_processor::HeaderProcessor, pruning_processor::PruningProcessor,
        virtual_processor::VirtualStateProcessor,
    },
};
use kestrel_consensus_core::{
    BlockHashSet, BlueWorkType, ChainPath,
    acceptance_data::AcceptanceData,
    api::{BlockCount, ConsensusApi, ConsensusStats, VirtualStateStats},
    block::{Block, BlockTemplate},
    blockhash::BlockHashExtensions,
    blockstatus::BlockStatus,
    coinbase::MinerData,
    config::Config,
    errors::{
        block::{BlockProcessResult, RuleError},
        consensus::{ConsensusError, ConsensusResult},
        pruning::PruningImportResult,
        tx::TxResult,
    },
    header::Header,
    notify::ConsensusNotificationRoot,
    pruning::PruningPointProof,
    trusted::{ExternalGhostdagData, PruningPointTrustedData, TrustedBlock},
    tx::{MutableTransaction, Transaction, TransactionOutpoint, UtxoEntry},
    utxo::utxo_view::UtxoView,
};
use kestrel_core::{info, time::unix_now};
use kestrel_database::prelude::{DB, DirectDbWriter, StoreResultExt};
use kestrel_hashes::Hash;
use parking_lot::Mutex;
use std::{
    ops::Deref,
    sync::{Arc, atomic::Ordering},
};

/// The consensus engine. Blocks are processed one at a time under the processing lock: header, body, virtual
/// resolution and pruning run to completion before the next block is admitted. Queries read the stores
/// concurrently through their own guards
pub struct Consensus {
    // DB
    db: Arc<DB>,

    // Processors
    pub(crate) header_processor: Arc<HeaderProcessor>,
    pub(crate) body_processor: Arc<BlockBodyProcessor>,
    pub(crate) virtual_processor: Arc<VirtualStateProcessor>,
    pub(crate) pruning_processor: Arc<PruningProcessor>,

    // Storage
    pub(crate) storage: Arc<ConsensusStorage>,

    // Services and managers
    pub(crate) services: Arc<ConsensusServices>,

    // Serializes all state mutations
    processing_lock: Mutex<()>,

    // Notification management
    notification_root: Arc<ConsensusNotificationRoot>,

    // Counters
    counters: Arc<ProcessingCounters>,

    // Config
    config: Arc<Config>,
}

impl Deref for Consensus {
    type Target = ConsensusStorage;

    fn deref(&self) -> &Self::Target {
        &self.storage
    }
}

impl Consensus {
    /// Opens consensus over `db`. A database created for another network or schema version is refused
    pub fn new(
        db: Arc<DB>,
        config: Arc<Config>,
        notification_root: Arc<ConsensusNotificationRoot>,
        counters: Arc<ProcessingCounters>,
    ) -> ConsensusResult<Self> {
        //
        // Storage layer
        //

        let storage = ConsensusStorage::new(db.clone(), &config).map_err(|err| ConsensusError::GeneralOwned(err.to_string()))?;
        Self::check_manifest(&db, &storage, &config)?;

        //
        // Services and managers
        //

        let services = ConsensusServices::new(&storage, &config);

        //
        // Pipeline processors
        //

        let header_processor = Arc::new(HeaderProcessor::new(&config, &storage, &services, counters.clone()));
        let body_processor =
            Arc::new(BlockBodyProcessor::new(&config, &storage, &services, notification_root.clone(), counters.clone()));
        let virtual_processor =
            Arc::new(VirtualStateProcessor::new(&config, &storage, &services, notification_root.clone(), counters.clone()));
        let pruning_processor = Arc::new(PruningProcessor::new(&config, &storage, &services, notification_root.clone()));

        let this = Self {
            db,
            header_processor,
            body_processor,
            virtual_processor,
            pruning_processor,
            storage,
            services,
            processing_lock: Mutex::new(()),
            notification_root,
            counters,
            config,
        };
        this.init();
        Ok(this)
    }

    fn check_manifest(db: &Arc<DB>, storage: &ConsensusStorage, config: &Config) -> ConsensusResult<()> {
        let expected = ConsensusManifest::new(config.network_name());
        let mut manifest_write = storage.manifest_store.write();
        match manifest_write.get().expect("manifest store read") {
            Some(manifest) if manifest != expected => Err(ConsensusError::IncompatibleDatabase(
                manifest.schema_version,
                manifest.network,
                expected.schema_version,
                expected.network,
            )),
            Some(_) => Ok(()),
            None => {
                manifest_write.set(DirectDbWriter::new(db), &expected).expect("manifest store write");
                Ok(())
            }
        }
    }

    fn init(&self) {
        let _guard = self.processing_lock.lock();

        // Ensure the origin root is registered
        self.header_processor.init();

        // Ensure that genesis was processed
        if self.config.process_genesis && !self.statuses_store.has(self.config.genesis_hash()).expect("statuses store read") {
            self.header_processor.process_genesis();
            self.body_processor.process_genesis();
            self.virtual_processor.process_genesis();
            info!("Initialized consensus on genesis {}", self.config.genesis_hash());
        }

        // Complete or discard an import interrupted by a shutdown
        if let Some((pruning_point, multiset)) = self.pruning_processor.recover_import() {
            self.virtual_processor.init_on_pruning_point(pruning_point, multiset);
            self.pruning_processor.notify_utxo_set_override(pruning_point);
        }
    }

    pub fn notification_root(&self) -> Arc<ConsensusNotificationRoot> {
        self.notification_root.clone()
    }

    pub fn counters(&self) -> Arc<ProcessingCounters> {
        self.counters.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn validate_and_insert_block_impl(&self, block: Block, trusted: Option<ExternalGhostdagData>) -> BlockProcessResult<BlockStatus> {
        let _guard = self.processing_lock.lock();
        self.counters.blocks_submitted.fetch_add(1, Ordering::Relaxed);

        let hash = block.hash();
        let status = self.header_processor.process_header(&block.header, trusted.as_ref())?;
        if block.is_header_only() || status.is_invalid() {
            return Ok(status);
        }

        let status = self.body_processor.process_body(&block, trusted.is_some())?;
        if trusted.is_some() || !status.is_utxo_valid_or_pending() {
            // Trusted blocks await the pruning point UTXO set before entering the virtual
            return Ok(status);
        }

        if !self.pruning_processor.is_importing() {
            self.virtual_processor.resolve_virtual();
            self.pruning_processor.advance_pruning_point_if_needed();
        }

        Ok(self.virtual_processor.block_status(hash).unwrap_or(status))
    }

    fn block_exists(&self, hash: Hash) -> bool {
        self.statuses_store.get(hash).optional().expect("statuses store read").is_some()
    }

    fn ensure_known(&self, hash: Hash) -> ConsensusResult<()> {
        if self.block_exists(hash) {
            Ok(())
        } else {
            Err(ConsensusError::HeaderNotFound(hash))
        }
    }
}

impl ConsensusApi for Consensus {
    fn build_block_template(&self, miner_data: MinerData, txs: Vec<Transaction>) -> Result<BlockTemplate, RuleError> {
        self.virtual_processor.build_block_template(miner_data, txs)
    }

    fn validate_mempool_transaction(&self, transaction: &mut MutableTransaction) -> TxResult<()> {
        self.virtual_processor.validate_mempool_transaction(transaction)
    }

    fn calculate_transaction_mass(&self, transaction: &Transaction) -> u64 {
        self.services.transaction_validator.mass_calculator().calc_tx_mass(transaction)
    }

    fn get_virtual_daa_score(&self) -> u64 {
        self.virtual_processor.virtual_state().daa_score
    }

    fn get_virtual_past_median_time(&self) -> u64 {
        self.virtual_processor.virtual_state().past_median_time
    }

    fn get_virtual_parents(&self) -> BlockHashSet {
        self.virtual_processor.virtual_state().parents.iter().copied().collect()
    }

    fn get_virtual_utxo(&self, outpoint: &TransactionOutpoint) -> Option<UtxoEntry> {
        UtxoView::get(&*self.virtual_utxo_store.read(), outpoint)
    }

    fn get_virtual_merge_depth_blue_work_threshold(&self) -> BlueWorkType {
        let virtual_state = self.virtual_processor.virtual_state();
        let pruning_point = self.get_pruning_point();
        let merge_depth_root =
            self.services.depth_manager.calc_merge_depth_root(&virtual_state.ghostdag_data, virtual_state.daa_score, pruning_point);
        self.ghostdag_store.get_blue_work(merge_depth_root).expect("chain blocks above the pruning point have ghostdag data")
    }

    fn validate_and_insert_block(&self, block: Block) -> BlockProcessResult<BlockStatus> {
        self.validate_and_insert_block_impl(block, None)
    }

    fn validate_and_insert_trusted_block(&self, trusted_block: TrustedBlock) -> BlockProcessResult<BlockStatus> {
        self.validate_and_insert_block_impl(trusted_block.block, Some(trusted_block.ghostdag))
    }

    fn get_sink(&self) -> Hash {
        self.virtual_processor.virtual_state().sink()
    }

    fn get_sink_timestamp(&self) -> u64 {
        self.headers_store.get_timestamp(self.get_sink()).expect("the sink has a header")
    }

    fn get_headers_selected_tip(&self) -> Hash {
        self.headers_selected_tip_store.read().get().expect("headers selected tip is initialized").hash
    }

    fn get_tips(&self) -> Vec<Hash> {
        self.body_tips_store.read().get().expect("body tips are initialized").iter().copied().collect()
    }

    fn get_block_status(&self, hash: Hash) -> Option<BlockStatus> {
        self.statuses_store.get(hash).optional().expect("statuses store read")
    }

    fn get_header(&self, hash: Hash) -> ConsensusResult<Arc<Header>> {
        self.headers_store.get_header(hash).optional().expect("headers store read").ok_or(ConsensusError::HeaderNotFound(hash))
    }

    fn get_block(&self, hash: Hash) -> ConsensusResult<Block> {
        let header = self.get_header(hash).map_err(|_| ConsensusError::BlockNotFound(hash))?;
        let transactions = self
            .block_transactions_store
            .get(hash)
            .optional()
            .expect("block transactions store read")
            .ok_or(ConsensusError::BlockNotFound(hash))?;
        Ok(Block::from_arcs(header, transactions))
    }

    fn get_ghostdag_data(&self, hash: Hash) -> ConsensusResult<ExternalGhostdagData> {
        let data =
            self.ghostdag_store.get_data(hash).optional().expect("ghostdag store read").ok_or(ConsensusError::MissingData(hash))?;
        Ok((&*data).into())
    }

    fn get_block_acceptance_data(&self, hash: Hash) -> ConsensusResult<Arc<AcceptanceData>> {
        self.acceptance_data_store.get(hash).optional().expect("acceptance data store read").ok_or(ConsensusError::MissingData(hash))
    }

    fn get_block_children(&self, hash: Hash) -> Option<Vec<Hash>> {
        self.relations_store
            .get_children(hash)
            .optional()
            .expect("relations store read")
            .map(|children| children.iter().copied().collect())
    }

    fn get_anticone(&self, block: Hash, context: Hash) -> ConsensusResult<Vec<Hash>> {
        self.ensure_known(block)?;
        self.ensure_known(context)?;
        Ok(self.services.dag_traversal_manager.anticone(block, std::iter::once(context), None)?)
    }

    fn get_virtual_chain_from_block(&self, low: Hash) -> ConsensusResult<ChainPath> {
        self.ensure_known(low)?;
        let pruning_point = self.pruning_point_store.read().pruning_point().expect("pruning point is initialized");
        if !self.services.reachability_service.is_dag_ancestor_of(pruning_point, low) {
            return Err(ConsensusError::BlockPruned(low));
        }
        Ok(self.services.dag_traversal_manager.calculate_chain_path(low, self.get_sink()))
    }

    fn is_chain_ancestor_of(&self, low: Hash, high: Hash) -> ConsensusResult<bool> {
        self.ensure_known(low)?;
        self.ensure_known(high)?;
        Ok(self.services.reachability_service.is_chain_ancestor_of(low, high))
    }

    fn is_chain_block(&self, hash: Hash) -> ConsensusResult<bool> {
        self.ensure_known(hash)?;
        Ok(self.selected_chain_store.read().get_by_hash(hash).optional().expect("selected chain store read").is_some())
    }

    fn get_hashes_between(&self, low: Hash, high: Hash, max_blocks: usize) -> ConsensusResult<(Vec<Hash>, Hash)> {
        Ok(self.services.sync_manager.antipast_hashes_between(low, high, max_blocks)?)
    }

    fn get_missing_block_body_hashes(&self, high: Hash) -> ConsensusResult<Vec<Hash>> {
        Ok(self.services.sync_manager.get_missing_block_body_hashes(high)?)
    }

    fn get_block_count(&self) -> BlockCount {
        let snapshot = self.counters.snapshot();
        BlockCount::new(snapshot.body_counts, snapshot.header_counts)
    }

    fn get_stats(&self) -> ConsensusStats {
        let virtual_state = self.virtual_processor.virtual_state();
        ConsensusStats {
            block_counts: self.get_block_count(),
            num_tips: self.body_tips_store.read().get().expect("body tips are initialized").len() as u64,
            virtual_stats: VirtualStateStats {
                num_parents: virtual_state.parents.len() as u32,
                daa_score: virtual_state.daa_score,
                bits: virtual_state.bits,
                past_median_time: virtual_state.past_median_time,
            },
        }
    }

    fn is_nearly_synced(&self) -> bool {
        let virtual_state = self.virtual_processor.virtual_state();
        let version = self.config.block_version(virtual_state.daa_score);
        let window_duration = version.target_time_per_block * version.difficulty_window_size as u64;
        self.get_sink_timestamp() + window_duration >= unix_now()
    }

    fn create_block_locator_from_pruning_point(&self, high: Hash, limit: usize) -> ConsensusResult<Vec<Hash>> {
        Ok(self.services.sync_manager.create_block_locator_from_pruning_point(high, limit)?)
    }

    fn create_virtual_selected_chain_block_locator(&self, low: Option<Hash>, high: Option<Hash>) -> ConsensusResult<Vec<Hash>> {
        Ok(self.services.sync_manager.create_virtual_selected_chain_block_locator(low, high)?)
    }

    fn get_pruning_point(&self) -> Hash {
        self.pruning_point_store.read().pruning_point().expect("pruning point is initialized")
    }

    fn get_pruning_point_proof(&self) -> Arc<PruningPointProof> {
        self.services.pruning_proof_manager.get_pruning_point_proof()
    }

    fn get_pruning_point_anticone_and_trusted_data(&self) -> ConsensusResult<Arc<PruningPointTrustedData>> {
        self.services.pruning_proof_manager.get_pruning_point_anticone_and_trusted_data()
    }

    fn get_pruning_point_utxos(
        &self,
        expected_pruning_point: Hash,
        from_outpoint: Option<TransactionOutpoint>,
        chunk_size: usize,
    ) -> ConsensusResult<Vec<(TransactionOutpoint, UtxoEntry)>> {
        if self.get_pruning_point() != expected_pruning_point {
            return Err(ConsensusError::UnexpectedPruningPoint);
        }
        let skip_first = from_outpoint.is_some();
        let utxos = self.pruning_processor.pruning_point_utxos(from_outpoint, chunk_size, skip_first);

        // The pruning point may have moved while the chunk was read
        if self.get_pruning_point() != expected_pruning_point {
            return Err(ConsensusError::UnexpectedPruningPoint);
        }
        Ok(utxos)
    }

    fn validate_pruning_proof(&self, proof: &PruningPointProof) -> PruningImportResult<()> {
        self.services.pruning_proof_manager.validate_pruning_point_proof(proof)
    }

    fn apply_pruning_proof(&self, proof: PruningPointProof, trusted_data: &PruningPointTrustedData) -> PruningImportResult<()> {
        let _guard = self.processing_lock.lock();
        self.services.pruning_proof_manager.apply_proof(proof, trusted_data)
    }

    fn start_pruning_point_utxo_set_import(&self) -> PruningImportResult<()> {
        let _guard = self.processing_lock.lock();
        self.pruning_processor.start_import()
    }

    fn append_imported_pruning_point_utxos(&self, utxos: &[(TransactionOutpoint, UtxoEntry)]) -> PruningImportResult<()> {
        let _guard = self.processing_lock.lock();
        self.pruning_processor.append_imported_utxos(utxos)
    }

    fn finish_pruning_point_utxo_set_import(&self, new_pruning_point: Hash) -> PruningImportResult<()> {
        let _guard = self.processing_lock.lock();
        let multiset = self.pruning_processor.finish_import(new_pruning_point)?;
        self.virtual_processor.init_on_pruning_point(new_pruning_point, multiset);
        self.pruning_processor.notify_utxo_set_override(new_pruning_point);
        info!("The virtual UTXO set was overridden by the UTXO set of pruning point {}", new_pruning_point);
        Ok(())
    }
}

impl Consensus {
    /// Returns whether `hash` is an ancestor (or equal) of some current DAG tip, used by relay flows to
    /// skip blocks already merged
    pub fn is_in_past_of_tips(&self, hash: Hash) -> bool {
        if hash.is_origin() || !self.services.reachability_service.has_reachability_data(hash) {
            return false;
        }
        let tips = self.get_tips();
        self.services.reachability_service.is_dag_ancestor_of_any(hash, &mut tips.into_iter())
    }
}
