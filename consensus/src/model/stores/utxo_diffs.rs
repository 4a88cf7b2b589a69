use kestrel_consensus_core::{BlockHasher, utxo::utxo_diff::UtxoDiff};
use kestrel_database::prelude::{CachedDbAccess, DB, DbWriter, StoreResult};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;
use std::sync::Arc;

/// Reader API for `UtxoDiffsStore`.
///
/// Every UTXO-verified block `b` keeps the diff its mergeset applies on top of its diff base `p`
/// (the selected parent), such that `utxo(b) = utxo(p) ⊕ diff(b)`. Following diff bases always
/// ends at the pruning point, whose UTXO set is materialized.
pub trait UtxoDiffsStoreReader {
    fn get(&self, hash: Hash) -> StoreResult<Arc<UtxoDiff>>;
    fn get_diff_base(&self, hash: Hash) -> StoreResult<Hash>;
    fn has(&self, hash: Hash) -> StoreResult<bool>;
}

pub trait UtxoDiffsStore: UtxoDiffsStoreReader {
    /// Sets (or replaces) the diff of `hash` together with the block it is relative to
    fn insert(&self, writer: impl DbWriter, hash: Hash, diff: Arc<UtxoDiff>, diff_base: Hash) -> StoreResult<()>;
    fn delete(&self, writer: impl DbWriter, hash: Hash) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct DbUtxoDiffsStore {
    access: CachedDbAccess<Hash, Arc<UtxoDiff>, BlockHasher>,
    bases_access: CachedDbAccess<Hash, Hash, BlockHasher>,
}

impl DbUtxoDiffsStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self {
            access: CachedDbAccess::new(db.clone(), cache_size, DatabaseStorePrefixes::UtxoDiffs.into()),
            bases_access: CachedDbAccess::new(db, cache_size, DatabaseStorePrefixes::UtxoDiffBases.into()),
        }
    }
}

impl UtxoDiffsStoreReader for DbUtxoDiffsStore {
    fn get(&self, hash: Hash) -> StoreResult<Arc<UtxoDiff>> {
        self.access.read(hash)
    }

    fn get_diff_base(&self, hash: Hash) -> StoreResult<Hash> {
        self.bases_access.read(hash)
    }

    fn has(&self, hash: Hash) -> StoreResult<bool> {
        self.access.has(hash)
    }
}

impl UtxoDiffsStore for DbUtxoDiffsStore {
    fn insert(&self, mut writer: impl DbWriter, hash: Hash, diff: Arc<UtxoDiff>, diff_base: Hash) -> StoreResult<()> {
        self.access.write(&mut writer, hash, diff)?;
        self.bases_access.write(&mut writer, hash, diff_base)
    }

    fn delete(&self, mut writer: impl DbWriter, hash: Hash) -> StoreResult<()> {
        self.access.delete(&mut writer, hash)?;
        self.bases_access.delete(&mut writer, hash)
    }
}
