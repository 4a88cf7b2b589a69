use std::sync::Arc;

use kestrel_consensus_core::{
    BlockHashMap, BlockHashSet, HashMapCustomHasher, coinbase::BlockRewardData, tx::TransactionId, utxo::utxo_diff::UtxoDiff,
};
use kestrel_database::prelude::{CachedDbItem, DB, DbWriter, StoreResult};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;
use kestrel_multiset::Multiset;
use serde::{Deserialize, Serialize};

use super::ghostdag::GhostdagData;

/// The state of the virtual block: a block whose parents are the chosen DAG tips and which
/// accepts the transactions of its mergeset. Templates are built on top of it
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct VirtualState {
    pub parents: Vec<Hash>,
    pub ghostdag_data: GhostdagData,
    pub daa_score: u64,
    pub bits: u32,
    pub past_median_time: u64,
    /// Multiset of the virtual UTXO set
    pub multiset: Multiset,
    /// The diff from `utxo(sink)` to the virtual UTXO set
    pub utxo_diff: UtxoDiff,
    pub accepted_tx_ids: Vec<TransactionId>,
    pub mergeset_rewards: BlockHashMap<BlockRewardData>,
    pub mergeset_non_daa: BlockHashSet,
}

impl VirtualState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parents: Vec<Hash>,
        daa_score: u64,
        bits: u32,
        past_median_time: u64,
        multiset: Multiset,
        utxo_diff: UtxoDiff,
        accepted_tx_ids: Vec<TransactionId>,
        mergeset_rewards: BlockHashMap<BlockRewardData>,
        mergeset_non_daa: BlockHashSet,
        ghostdag_data: GhostdagData,
    ) -> Self {
        Self {
            parents,
            ghostdag_data,
            daa_score,
            bits,
            past_median_time,
            multiset,
            utxo_diff,
            accepted_tx_ids,
            mergeset_rewards,
            mergeset_non_daa,
        }
    }

    /// The virtual right after a pruning point was installed (genesis included): its only
    /// parent is that block and nothing is accepted on top of it
    pub fn from_pruning_point(
        pruning_point: Hash,
        daa_score: u64,
        bits: u32,
        past_median_time: u64,
        multiset: Multiset,
        ghostdag_data: GhostdagData,
    ) -> Self {
        Self {
            parents: vec![pruning_point],
            ghostdag_data,
            daa_score,
            bits,
            past_median_time,
            multiset,
            utxo_diff: UtxoDiff::default(),
            accepted_tx_ids: Vec::new(),
            mergeset_rewards: BlockHashMap::new(),
            mergeset_non_daa: BlockHashSet::new(),
        }
    }

    pub fn sink(&self) -> Hash {
        self.ghostdag_data.selected_parent
    }
}

/// Reader API for `VirtualStateStore`.
pub trait VirtualStateStoreReader {
    fn get(&self) -> StoreResult<Arc<VirtualState>>;
}

pub trait VirtualStateStore: VirtualStateStoreReader {
    fn set(&mut self, writer: impl DbWriter, state: Arc<VirtualState>) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct DbVirtualStateStore {
    access: CachedDbItem<Arc<VirtualState>>,
}

impl DbVirtualStateStore {
    pub fn new(db: Arc<DB>) -> Self {
        Self { access: CachedDbItem::new(db, DatabaseStorePrefixes::VirtualState.into()) }
    }

    pub fn is_initialized(&self) -> StoreResult<bool> {
        match self.access.read() {
            Ok(_) => Ok(true),
            Err(err) if err.is_key_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl VirtualStateStoreReader for DbVirtualStateStore {
    fn get(&self) -> StoreResult<Arc<VirtualState>> {
        self.access.read()
    }
}

impl VirtualStateStore for DbVirtualStateStore {
    fn set(&mut self, writer: impl DbWriter, state: Arc<VirtualState>) -> StoreResult<()> {
        self.access.write(writer, &state)
    }
}
