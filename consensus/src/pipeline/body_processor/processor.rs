use crate::{
    consensus::{
        services::{ConsensusServices, DbBlockDepthManager, DbWindowManager},
        storage::ConsensusStorage,
    },
    model::{
        services::reachability::{MTReachabilityService, ReachabilityService},
        stores::{
            block_transactions::{BlockTransactionsStore, DbBlockTransactionsStore},
            depth::DbDepthStore,
            ghostdag::DbGhostdagStore,
            pruning::{DbPruningStore, PruningStoreReader},
            reachability::DbReachabilityStore,
            statuses::{DbStatusesStore, StatusesStore, StatusesStoreReader},
            tips::{DbTipsStore, TipsStore},
        },
    },
    pipeline::ProcessingCounters,
    processes::{coinbase::CoinbaseManager, transaction_validator::TransactionValidator},
};
use kestrel_consensus_core::{
    block::Block,
    blockstatus::BlockStatus::{self, StatusHeaderOnly, StatusInvalid, StatusUTXOPendingVerification},
    config::{Config, genesis::GenesisBlock, params::BlockVersionSchedule},
    errors::block::{BlockProcessResult, RuleError},
    notify::{BlockAddedNotification, ConsensusNotification, ConsensusNotificationRoot},
    tx::Transaction,
};
use kestrel_core::{debug, trace};
use kestrel_database::prelude::{DB, DirectDbWriter, StagingArea, StoreResultExt};
use kestrel_hashes::Hash;
use parking_lot::RwLock;
use std::sync::{Arc, atomic::Ordering};

pub struct BlockBodyProcessor {
    // DB
    db: Arc<DB>,

    // Config
    pub(super) genesis: GenesisBlock,
    pub(super) block_versions: BlockVersionSchedule,

    // Stores
    pub(super) statuses_store: Arc<DbStatusesStore>,
    pub(super) ghostdag_store: Arc<DbGhostdagStore>,
    pub(super) depth_store: Arc<DbDepthStore>,
    pub(super) block_transactions_store: Arc<DbBlockTransactionsStore>,
    body_tips_store: Arc<RwLock<DbTipsStore>>,
    pruning_point_store: Arc<RwLock<DbPruningStore>>,

    // Managers and services
    pub(super) reachability_service: MTReachabilityService<DbReachabilityStore>,
    pub(super) coinbase_manager: CoinbaseManager,
    pub(super) transaction_validator: TransactionValidator,
    pub(super) window_manager: DbWindowManager,
    pub(super) depth_manager: DbBlockDepthManager,

    // Notifier
    notification_root: Arc<ConsensusNotificationRoot>,

    // Counters
    counters: Arc<ProcessingCounters>,
}

impl BlockBodyProcessor {
    pub fn new(
        config: &Config,
        storage: &Arc<ConsensusStorage>,
        services: &Arc<ConsensusServices>,
        notification_root: Arc<ConsensusNotificationRoot>,
        counters: Arc<ProcessingCounters>,
    ) -> Self {
        Self {
            db: storage.db.clone(),
            genesis: config.genesis.clone(),
            block_versions: config.block_versions,

            statuses_store: storage.statuses_store.clone(),
            ghostdag_store: storage.ghostdag_store.clone(),
            depth_store: storage.depth_store.clone(),
            block_transactions_store: storage.block_transactions_store.clone(),
            body_tips_store: storage.body_tips_store.clone(),
            pruning_point_store: storage.pruning_point_store.clone(),

            reachability_service: services.reachability_service.clone(),
            coinbase_manager: services.coinbase_manager.clone(),
            transaction_validator: services.transaction_validator.clone(),
            window_manager: services.window_manager.clone(),
            depth_manager: services.depth_manager.clone(),

            notification_root,
            counters,
        }
    }

    /// Validates and stores the body of a block whose header was already processed. Returns
    /// `StatusUTXOPendingVerification` for a new body; UTXO verification is left to the virtual processor
    pub fn process_body(&self, block: &Block, is_trusted: bool) -> BlockProcessResult<BlockStatus> {
        let hash = block.hash();
        let status = self.statuses_store.get(hash).optional().expect("statuses store read");
        match status {
            Some(StatusInvalid) => return Err(RuleError::KnownInvalid),
            Some(StatusHeaderOnly) => {} // Proceed to body processing
            Some(status) if status.has_block_body() => return Ok(status),
            Some(status) => panic!("unexpected block status {status:?}"),
            None => panic!("body of {hash} was sent for processing before its header"),
        }

        if !is_trusted {
            self.check_not_in_pruning_point_past(hash)?;
        }

        let mass = match self.validate_body(block, is_trusted) {
            Ok(mass) => mass,
            Err(err) => {
                // MissingParents and PrunedBlock reject the body only. A bad merkle root means the
                // transactions did not match the header, and the right ones may still arrive
                if !matches!(err, RuleError::BadMerkleRoot(_, _) | RuleError::MissingParents(_) | RuleError::PrunedBlock(_)) {
                    debug!("Body of {} is invalid: {}", hash, err);
                    self.statuses_store.set(DirectDbWriter::new(&self.db), hash, StatusInvalid).expect("statuses store write");
                }
                return Err(err);
            }
        };

        self.commit_body(hash, block.header.direct_parents(), block.transactions.clone());

        self.notification_root.notify(ConsensusNotification::BlockAdded(BlockAddedNotification { block: block.clone() }));

        self.counters.body_counts.fetch_add(1, Ordering::Relaxed);
        self.counters.txs_counts.fetch_add(block.transactions.len() as u64, Ordering::Relaxed);
        self.counters.mass_counts.fetch_add(mass, Ordering::Relaxed);
        trace!("Processed body of {} with {} transactions", hash, block.transactions.len());
        Ok(StatusUTXOPendingVerification)
    }

    fn validate_body(&self, block: &Block, is_trusted: bool) -> BlockProcessResult<u64> {
        let mass = self.validate_body_in_isolation(block)?;
        if !is_trusted {
            self.validate_body_in_context(block)?;
        }
        Ok(mass)
    }

    /// Bodies are only accepted for blocks in the future of the pruning point (inclusive)
    fn check_not_in_pruning_point_past(&self, hash: Hash) -> BlockProcessResult<()> {
        let pruning_point = self.pruning_point_store.read().pruning_point().expect("pruning point is initialized");
        if !self.reachability_service.has_reachability_data(hash) || !self.reachability_service.is_dag_ancestor_of(pruning_point, hash)
        {
            return Err(RuleError::PrunedBlock(hash));
        }
        Ok(())
    }

    fn commit_body(&self, hash: Hash, parents: &[Hash], transactions: Arc<Vec<Transaction>>) {
        let area = StagingArea::new();

        // This is an append only store so it requires no lock
        self.block_transactions_store.insert(&area, hash, transactions).expect("block transactions are new");

        let mut body_tips_write = self.body_tips_store.write();
        body_tips_write.add_tip(&area, hash, parents).expect("body tips write");
        self.statuses_store.set(&area, hash, StatusUTXOPendingVerification).expect("statuses store write");

        area.commit_to_db(&self.db).expect("body commit");
        drop(body_tips_write);
    }

    /// Writes the genesis body and initializes the body tips with genesis as the single tip
    pub fn process_genesis(&self) {
        let mut body_tips_write = self.body_tips_store.write();
        body_tips_write.init(DirectDbWriter::new(&self.db), &[]).expect("body tips init");
        drop(body_tips_write);

        self.commit_body(self.genesis.hash(), &[], Arc::new(self.genesis.build_genesis_transactions()));
    }
}
