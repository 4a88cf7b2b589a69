use std::sync::Arc;

use kestrel_consensus_core::config::Config;
use kestrel_txscript::SigCache;

use crate::{
    model::{
        services::reachability::MTReachabilityService,
        stores::{
            depth::DbDepthStore, ghostdag::DbGhostdagStore, headers::DbHeadersStore, pruning::DbPruningStore,
            reachability::DbReachabilityStore, relations::DbRelationsStore, selected_chain::DbSelectedChainStore,
            statuses::DbStatusesStore,
        },
    },
    processes::{
        block_depth::BlockDepthManager, coinbase::CoinbaseManager, ghostdag::protocol::GhostdagManager,
        parents_builder::ParentsManager, pruning::PruningPointManager, pruning_proof::PruningProofManager, sync::SyncManager,
        transaction_validator::TransactionValidator, traversal_manager::DagTraversalManager, window::WindowManager,
    },
};

use super::storage::ConsensusStorage;

pub type DbGhostdagManager =
    GhostdagManager<DbGhostdagStore, DbRelationsStore, MTReachabilityService<DbReachabilityStore>, DbHeadersStore>;
pub type DbDagTraversalManager = DagTraversalManager<DbGhostdagStore, DbRelationsStore, DbReachabilityStore>;
pub type DbWindowManager = WindowManager<DbGhostdagStore, DbHeadersStore>;
pub type DbSyncManager = SyncManager<DbReachabilityStore, DbGhostdagStore, DbSelectedChainStore, DbPruningStore, DbStatusesStore>;
pub type DbParentsManager = ParentsManager<DbHeadersStore, MTReachabilityService<DbReachabilityStore>>;
pub type DbBlockDepthManager = BlockDepthManager<DbDepthStore, DbReachabilityStore, DbGhostdagStore>;
pub type DbPruningPointManager = PruningPointManager<DbReachabilityStore, DbHeadersStore>;

/// Number of signature verifications remembered across blocks and mempool transactions
const SIG_CACHE_SIZE: u64 = 10_000;

/// The stateless managers of consensus, all reading from the same storage
pub struct ConsensusServices {
    pub reachability_service: MTReachabilityService<DbReachabilityStore>,

    pub window_manager: DbWindowManager,
    pub dag_traversal_manager: DbDagTraversalManager,
    pub ghostdag_manager: DbGhostdagManager,
    pub coinbase_manager: CoinbaseManager,
    pub pruning_point_manager: DbPruningPointManager,
    pub pruning_proof_manager: Arc<PruningProofManager>,
    pub parents_manager: DbParentsManager,
    pub depth_manager: DbBlockDepthManager,
    pub sync_manager: DbSyncManager,
    pub transaction_validator: TransactionValidator,
}

impl ConsensusServices {
    pub fn new(storage: &Arc<ConsensusStorage>, config: &Config) -> Arc<Self> {
        let params = &config.params;
        let genesis_hash = params.genesis_hash();

        let reachability_service = MTReachabilityService::new(storage.reachability_store.clone());
        let dag_traversal_manager = DagTraversalManager::new(
            storage.ghostdag_store.clone(),
            storage.relations_store.clone(),
            reachability_service.clone(),
        );
        let window_manager = WindowManager::new(
            &params.genesis,
            storage.ghostdag_store.clone(),
            storage.headers_store.clone(),
            params.block_versions,
            params.min_difficulty_window_len,
            params.max_difficulty_target,
        );
        let ghostdag_manager = GhostdagManager::new(
            genesis_hash,
            storage.ghostdag_store.clone(),
            storage.relations_store.clone(),
            storage.headers_store.clone(),
            reachability_service.clone(),
        );
        let coinbase_manager = CoinbaseManager::new(params);
        let pruning_point_manager =
            PruningPointManager::new(params.block_versions, genesis_hash, reachability_service.clone(), storage.headers_store.clone());
        let parents_manager =
            ParentsManager::new(params.max_block_level, genesis_hash, storage.headers_store.clone(), reachability_service.clone());
        let depth_manager = BlockDepthManager::new(
            params.block_versions,
            genesis_hash,
            storage.depth_store.clone(),
            reachability_service.clone(),
            storage.ghostdag_store.clone(),
        );
        let sync_manager = SyncManager::new(
            reachability_service.clone(),
            storage.ghostdag_store.clone(),
            storage.selected_chain_store.clone(),
            storage.pruning_point_store.clone(),
            storage.statuses_store.clone(),
        );
        let transaction_validator = TransactionValidator::new(params, SigCache::new(SIG_CACHE_SIZE));
        let pruning_proof_manager = Arc::new(PruningProofManager::new(
            storage,
            dag_traversal_manager.clone(),
            window_manager.clone(),
            params.clone(),
            config.skip_proof_of_work,
        ));

        Arc::new(Self {
            reachability_service,
            window_manager,
            dag_traversal_manager,
            ghostdag_manager,
            coinbase_manager,
            pruning_point_manager,
            pruning_proof_manager,
            parents_manager,
            depth_manager,
            sync_manager,
            transaction_validator,
        })
    }
}
