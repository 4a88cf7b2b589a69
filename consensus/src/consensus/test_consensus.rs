use super::Consensus;
use crate::{
    model::stores::{ghostdag::GhostdagData, pruning::PruningStoreReader},
    pipeline::ProcessingCounters,
    processes::difficulty::calc_work,
};
use kestrel_consensus_core::{
    api::ConsensusApi,
    block::{Block, MutableBlock},
    blockstatus::BlockStatus,
    coinbase::MinerData,
    config::Config,
    errors::{block::BlockProcessResult, consensus::ConsensusResult},
    header::Header,
    notify::ConsensusNotificationRoot,
    tx::Transaction,
};
use kestrel_database::{
    create_temp_db,
    prelude::{ConnBuilder, DB},
    utils::DbLifetime,
};
use kestrel_hashes::Hash;
use kestrel_txscript::standard::test_helpers::op_true_script;
use std::{ops::Deref, sync::Arc};

/// A consensus instance over a temporary database with helpers for building blocks with chosen
/// parents and precomputed hashes. Meant for configurations with proof of work skipped
pub struct TestConsensus {
    consensus: Arc<Consensus>,
    config: Arc<Config>,
    _db_lifetime: Option<DbLifetime>,
}

impl TestConsensus {
    /// Creates a consensus over a fresh temporary database which is destroyed on drop
    pub fn new(config: &Config) -> Self {
        let (db_lifetime, db) = create_temp_db!(ConnBuilder::default().with_files_limit(10));
        let mut tc = Self::with_db(db, config);
        tc._db_lifetime = Some(db_lifetime);
        tc
    }

    /// Opens a consensus over an existing database. The caller keeps the database alive
    pub fn with_db(db: Arc<DB>, config: &Config) -> Self {
        Self::try_with_db(db, config).expect("the test database is compatible")
    }

    pub fn try_with_db(db: Arc<DB>, config: &Config) -> ConsensusResult<Self> {
        let config = Arc::new(config.clone());
        let consensus =
            Consensus::new(db, config.clone(), Arc::new(ConsensusNotificationRoot::new()), Arc::new(ProcessingCounters::default()))?;
        Ok(Self { consensus: Arc::new(consensus), config, _db_lifetime: None })
    }

    pub fn consensus_clone(&self) -> Arc<Consensus> {
        self.consensus.clone()
    }

    pub fn params(&self) -> &Config {
        &self.config
    }

    /// Miner data unique to `hash`, paying to a script anyone can spend
    pub fn miner_data(hash: Hash) -> MinerData {
        MinerData::new(op_true_script(), hash.as_bytes().to_vec())
    }

    /// Builds a full block with the given parents and transactions as a miner would. The selected parent must
    /// be on a UTXO valid chain
    pub fn build_block_with_parents_and_transactions(&self, hash: Hash, parents: Vec<Hash>, txs: Vec<Transaction>) -> MutableBlock {
        let mut template = self
            .consensus
            .virtual_processor
            .build_block_template_with_parents(parents, Self::miner_data(hash), txs)
            .expect("a block template can be built over the given parents");
        template.block.header.hash = hash;
        template.block
    }

    pub fn build_block_with_parents(&self, hash: Hash, parents: Vec<Hash>) -> MutableBlock {
        self.build_block_with_parents_and_transactions(hash, parents, vec![])
    }

    /// Builds a valid header with the given parents. No UTXO state is required, so the UTXO related
    /// commitments are left empty
    pub fn build_header_with_parents(&self, hash: Hash, parents: Vec<Hash>) -> Header {
        let services = &self.consensus.services;
        let selected_parent = services.ghostdag_manager.find_selected_parent(parents.iter().copied());
        let version = services.window_manager.block_version_for_selected_parent(selected_parent);
        let ghostdag_data: Arc<GhostdagData> = Arc::new(services.ghostdag_manager.ghostdag(&parents, version.ghostdag_k));
        let daa_window = services.window_manager.block_daa_window(&ghostdag_data);
        let bits = services.window_manager.calculate_difficulty_bits(&ghostdag_data, &daa_window);
        let (past_median_time, _) = services.window_manager.calc_past_median_time(&ghostdag_data);
        let current_pruning_point = self.consensus.pruning_point_store.read().pruning_point().expect("pruning point is initialized");
        let pruning_point = services
            .pruning_point_manager
            .expected_header_pruning_point(ghostdag_data.to_compact(), daa_window.daa_score)
            .unwrap_or(current_pruning_point);

        let mut header = Header::from_precomputed_hash(hash, vec![]);
        header.version = version.version;
        header.parents_by_level = services.parents_manager.calc_block_parents(&parents);
        header.timestamp = past_median_time + 1;
        header.bits = bits;
        header.daa_score = daa_window.daa_score;
        header.blue_score = ghostdag_data.blue_score;
        header.blue_work = ghostdag_data.blue_work + calc_work(bits);
        header.pruning_point = pruning_point;
        header
    }

    /// Builds and inserts a full block, returning the processing result
    pub fn add_block_with_parents(&self, hash: Hash, parents: Vec<Hash>) -> BlockProcessResult<BlockStatus> {
        self.validate_and_insert_block(self.build_block_with_parents(hash, parents).to_immutable())
    }

    pub fn add_block_with_parents_and_transactions(
        &self,
        hash: Hash,
        parents: Vec<Hash>,
        txs: Vec<Transaction>,
    ) -> BlockProcessResult<BlockStatus> {
        self.validate_and_insert_block(self.build_block_with_parents_and_transactions(hash, parents, txs).to_immutable())
    }

    pub fn add_header_only_block_with_parents(&self, hash: Hash, parents: Vec<Hash>) -> BlockProcessResult<BlockStatus> {
        self.validate_and_insert_block(Block::from_header(self.build_header_with_parents(hash, parents)))
    }
}

impl Deref for TestConsensus {
    type Target = Consensus;

    fn deref(&self) -> &Self::Target {
        &self.consensus
    }
}
