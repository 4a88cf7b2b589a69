use crate::{
    model::stores::{
        acceptance_data::DbAcceptanceDataStore,
        block_transactions::DbBlockTransactionsStore,
        daa::DbDaaStore,
        depth::DbDepthStore,
        ghostdag::DbGhostdagStore,
        headers::DbHeadersStore,
        headers_selected_tip::DbHeadersSelectedTipStore,
        manifest::DbManifestStore,
        pruning::DbPruningStore,
        pruning_import::DbPruningImportStore,
        reachability::{DbReachabilityStore, StagingReachabilityStore},
        relations::DbRelationsStore,
        selected_chain::DbSelectedChainStore,
        statuses::DbStatusesStore,
        tips::DbTipsStore,
        utxo_diffs::DbUtxoDiffsStore,
        utxo_multisets::DbUtxoMultisetsStore,
        utxo_set::DbUtxoSetStore,
        virtual_state::DbVirtualStateStore,
    },
    processes::reachability::inquirer as reachability,
};

use kestrel_consensus_core::config::Config;
use kestrel_database::{
    prelude::{DB, StagingArea, StoreResult},
    registry::DatabaseStorePrefixes,
};
use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;

/// All consensus stores over a single database.
///
/// Stores whose write API takes `&mut self` are wrapped by a lock. The remaining stores are append-only
/// (or keyed by block) and support concurrent readers directly
pub struct ConsensusStorage {
    // DB
    pub db: Arc<DB>,

    // Locked stores
    pub reachability_store: Arc<RwLock<DbReachabilityStore>>,
    pub pruning_point_store: Arc<RwLock<DbPruningStore>>,
    pub pruning_import_store: Arc<RwLock<DbPruningImportStore>>,
    pub headers_selected_tip_store: Arc<RwLock<DbHeadersSelectedTipStore>>,
    pub body_tips_store: Arc<RwLock<DbTipsStore>>,
    pub selected_chain_store: Arc<RwLock<DbSelectedChainStore>>,
    pub virtual_state_store: Arc<RwLock<DbVirtualStateStore>>,
    pub virtual_utxo_store: Arc<RwLock<DbUtxoSetStore>>,
    pub pruning_utxo_store: Arc<RwLock<DbUtxoSetStore>>,
    pub imported_utxo_store: Arc<RwLock<DbUtxoSetStore>>,
    pub manifest_store: Arc<RwLock<DbManifestStore>>,

    // Append-only stores
    pub statuses_store: Arc<DbStatusesStore>,
    pub relations_store: Arc<DbRelationsStore>,
    pub ghostdag_store: Arc<DbGhostdagStore>,
    pub headers_store: Arc<DbHeadersStore>,
    pub block_transactions_store: Arc<DbBlockTransactionsStore>,
    pub daa_excluded_store: Arc<DbDaaStore>,
    pub depth_store: Arc<DbDepthStore>,

    // Utxo-related stores
    pub utxo_diffs_store: Arc<DbUtxoDiffsStore>,
    pub utxo_multisets_store: Arc<DbUtxoMultisetsStore>,
    pub acceptance_data_store: Arc<DbAcceptanceDataStore>,
}

impl ConsensusStorage {
    pub fn new(db: Arc<DB>, config: &Config) -> StoreResult<Arc<Self>> {
        let perf = &config.perf;
        let max_version = config.block_versions.iter().max_by_key(|v| v.pruning_depth()).copied().unwrap_or(*config.block_version(0));
        let pruning_size_for_caches = (max_version.pruning_depth() + max_version.finality_depth()) as usize;

        // Add stochastic noise to cache sizes to avoid predictable and equal sizes across all network nodes
        let noise = |size: usize| (size + rand::thread_rng().gen_range(0..16)) as u64;

        let header_cache = pruning_size_for_caches.min(perf.header_data_cache_size.max(1) * 10).max(perf.header_data_cache_size);
        let block_data_cache = perf.block_data_cache_size;
        let utxo_cache = perf.utxo_set_cache_size;

        // Headers
        let statuses_store = Arc::new(DbStatusesStore::new(db.clone(), noise(header_cache)));
        let relations_store = Arc::new(DbRelationsStore::new(db.clone(), noise(header_cache)));
        let reachability_store = Arc::new(RwLock::new(DbReachabilityStore::new(db.clone(), noise(header_cache))));
        let ghostdag_store = Arc::new(DbGhostdagStore::new(db.clone(), noise(header_cache)));
        let headers_store = Arc::new(DbHeadersStore::new(db.clone(), noise(perf.header_data_cache_size)));
        let daa_excluded_store = Arc::new(DbDaaStore::new(db.clone(), noise(perf.header_data_cache_size)));
        let depth_store = Arc::new(DbDepthStore::new(db.clone(), noise(perf.header_data_cache_size)));
        let selected_chain_store = Arc::new(RwLock::new(DbSelectedChainStore::new(db.clone(), noise(perf.header_data_cache_size))));

        // Pruning
        let pruning_point_store = Arc::new(RwLock::new(DbPruningStore::new(db.clone())));
        let pruning_import_store = Arc::new(RwLock::new(DbPruningImportStore::new(db.clone())));
        let pruning_utxo_store =
            Arc::new(RwLock::new(DbUtxoSetStore::new(db.clone(), noise(utxo_cache), DatabaseStorePrefixes::PruningUtxoset.into())));
        let imported_utxo_store =
            Arc::new(RwLock::new(DbUtxoSetStore::new(db.clone(), noise(utxo_cache), DatabaseStorePrefixes::ImportedUtxoset.into())));

        // Txs
        let block_transactions_store = Arc::new(DbBlockTransactionsStore::new(db.clone(), noise(block_data_cache)));
        let utxo_diffs_store = Arc::new(DbUtxoDiffsStore::new(db.clone(), noise(block_data_cache)));
        let utxo_multisets_store = Arc::new(DbUtxoMultisetsStore::new(db.clone(), noise(block_data_cache)));
        let acceptance_data_store = Arc::new(DbAcceptanceDataStore::new(db.clone(), noise(block_data_cache)));

        // Tips
        let headers_selected_tip_store = Arc::new(RwLock::new(DbHeadersSelectedTipStore::new(db.clone())));
        let body_tips_store = Arc::new(RwLock::new(DbTipsStore::new(db.clone())));

        // Virtual stores
        let virtual_state_store = Arc::new(RwLock::new(DbVirtualStateStore::new(db.clone())));
        let virtual_utxo_store =
            Arc::new(RwLock::new(DbUtxoSetStore::new(db.clone(), noise(utxo_cache), DatabaseStorePrefixes::VirtualUtxoset.into())));

        let manifest_store = Arc::new(RwLock::new(DbManifestStore::new(db.clone())));

        // Ensure that the reachability store is initialized
        {
            let reachability_read = reachability_store.upgradable_read();
            if reachability_read.get_reindex_root().is_err() {
                let area = StagingArea::new();
                reachability::init(&mut StagingReachabilityStore::new(&reachability_read, &area))
                    .map_err(|err| kestrel_database::prelude::StoreError::DataInconsistency(err.to_string()))?;
                let _write_guard = parking_lot::RwLockUpgradableReadGuard::upgrade(reachability_read);
                area.commit_to_db(&db)?;
            }
        }

        Ok(Arc::new(Self {
            db,
            reachability_store,
            pruning_point_store,
            pruning_import_store,
            headers_selected_tip_store,
            body_tips_store,
            selected_chain_store,
            virtual_state_store,
            virtual_utxo_store,
            pruning_utxo_store,
            imported_utxo_store,
            manifest_store,
            statuses_store,
            relations_store,
            ghostdag_store,
            headers_store,
            block_transactions_store,
            daa_excluded_store,
            depth_store,
            utxo_diffs_store,
            utxo_multisets_store,
            acceptance_data_store,
        }))
    }
}
