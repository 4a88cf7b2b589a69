mod apply;
mod build;
mod validate;

use std::sync::Arc;

use kestrel_consensus_core::{
    BlockLevel,
    config::params::Params,
    header::Header,
    pruning::{PruningPointProof, PruningPointTrustedData},
};
use kestrel_database::prelude::DB;
use kestrel_hashes::Hash;
use kestrel_pow::{calc_block_level_from_pow_hash, calc_block_pow_hash};
use parking_lot::{Mutex, RwLock};

use crate::{
    consensus::{
        services::{DbDagTraversalManager, DbWindowManager},
        storage::ConsensusStorage,
    },
    model::stores::{
        ghostdag::DbGhostdagStore, headers::DbHeadersStore, headers_selected_tip::DbHeadersSelectedTipStore, pruning::DbPruningStore,
        statuses::DbStatusesStore, tips::DbTipsStore,
    },
};

struct CachedPruningPointData<T> {
    pruning_point: Hash,
    data: Arc<T>,
}

impl<T> Clone for CachedPruningPointData<T> {
    fn clone(&self) -> Self {
        Self { pruning_point: self.pruning_point, data: self.data.clone() }
    }
}

/// Builds, validates and applies pruning point proofs.
///
/// A proof is the chain of past pruning points from genesis to the current pruning point, linked through the
/// `pruning_point` header field. Together with the trusted data (the pruning point anticone and the headers
/// its difficulty windows reach) it lets a new node start validating blocks above the pruning point without
/// the history below it
pub struct PruningProofManager {
    db: Arc<DB>,

    headers_store: Arc<DbHeadersStore>,
    ghostdag_store: Arc<DbGhostdagStore>,
    statuses_store: Arc<DbStatusesStore>,
    pruning_point_store: Arc<RwLock<DbPruningStore>>,
    headers_selected_tip_store: Arc<RwLock<DbHeadersSelectedTipStore>>,
    body_tips_store: Arc<RwLock<DbTipsStore>>,

    traversal_manager: DbDagTraversalManager,
    window_manager: DbWindowManager,

    cached_proof: Mutex<Option<CachedPruningPointData<PruningPointProof>>>,
    cached_trusted_data: Mutex<Option<CachedPruningPointData<PruningPointTrustedData>>>,

    params: Params,
    skip_proof_of_work: bool,
}

impl PruningProofManager {
    pub fn new(
        storage: &Arc<ConsensusStorage>,
        traversal_manager: DbDagTraversalManager,
        window_manager: DbWindowManager,
        params: Params,
        skip_proof_of_work: bool,
    ) -> Self {
        Self {
            db: storage.db.clone(),
            headers_store: storage.headers_store.clone(),
            ghostdag_store: storage.ghostdag_store.clone(),
            statuses_store: storage.statuses_store.clone(),
            pruning_point_store: storage.pruning_point_store.clone(),
            headers_selected_tip_store: storage.headers_selected_tip_store.clone(),
            body_tips_store: storage.body_tips_store.clone(),
            traversal_manager,
            window_manager,
            cached_proof: Mutex::new(None),
            cached_trusted_data: Mutex::new(None),
            params,
            skip_proof_of_work,
        }
    }

    fn genesis_hash(&self) -> Hash {
        self.params.genesis_hash()
    }

    fn block_level(&self, header: &Header) -> BlockLevel {
        let variant = self.params.pow_scores.variant(header.daa_score);
        calc_block_level_from_pow_hash(calc_block_pow_hash(header, variant), self.params.max_block_level)
    }
}
