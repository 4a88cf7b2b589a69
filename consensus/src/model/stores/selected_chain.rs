use std::sync::Arc;

use kestrel_consensus_core::{BlockHasher, ChainPath};
use kestrel_database::prelude::{CachedDbAccess, CachedDbItem, DB, DbWriter, StagingArea, StoreError, StoreResult};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;

/// Reader API for `SelectedChainStore`.
pub trait SelectedChainStoreReader {
    fn get_by_hash(&self, hash: Hash) -> StoreResult<u64>;
    fn get_by_index(&self, index: u64) -> StoreResult<Hash>;
    fn get_tip(&self) -> StoreResult<(u64, Hash)>;
}

/// Write API for `SelectedChainStore`. The set function is deliberately `mut`
/// since the chain is not append-only and thus needs to be guarded.
pub trait SelectedChainStore: SelectedChainStoreReader {
    fn apply_changes(&mut self, area: &StagingArea, changes: &ChainPath) -> StoreResult<()>;
    fn init_with_pruning_point(&mut self, writer: impl DbWriter, block: Hash) -> StoreResult<()>;
}

/// Big-endian so that the DB order matches the numeric order
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct ChainIndexKey([u8; 8]);

impl From<u64> for ChainIndexKey {
    fn from(index: u64) -> Self {
        Self(index.to_be_bytes())
    }
}

impl AsRef<[u8]> for ChainIndexKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The selected chain of the virtual, indexed from the pruning point it was initialized with
#[derive(Clone)]
pub struct DbSelectedChainStore {
    access_hash_by_index: CachedDbAccess<ChainIndexKey, Hash>,
    access_index_by_hash: CachedDbAccess<Hash, u64, BlockHasher>,
    access_highest_index: CachedDbItem<(u64, Hash)>,
}

impl DbSelectedChainStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self {
            access_hash_by_index: CachedDbAccess::new(db.clone(), cache_size, DatabaseStorePrefixes::ChainHashByIndex.into()),
            access_index_by_hash: CachedDbAccess::new(db.clone(), cache_size, DatabaseStorePrefixes::ChainIndexByHash.into()),
            access_highest_index: CachedDbItem::new(db, DatabaseStorePrefixes::ChainHighestIndex.into()),
        }
    }
}

impl SelectedChainStoreReader for DbSelectedChainStore {
    fn get_by_hash(&self, hash: Hash) -> StoreResult<u64> {
        self.access_index_by_hash.read(hash)
    }

    fn get_by_index(&self, index: u64) -> StoreResult<Hash> {
        self.access_hash_by_index.read(index.into())
    }

    fn get_tip(&self) -> StoreResult<(u64, Hash)> {
        self.access_highest_index.read()
    }
}

impl SelectedChainStore for DbSelectedChainStore {
    fn apply_changes(&mut self, area: &StagingArea, changes: &ChainPath) -> StoreResult<()> {
        let (mut highest_index, mut tip) = self.access_highest_index.read_staged(area)?;
        for removed in changes.removed.iter().copied() {
            if removed != tip {
                return Err(StoreError::DataInconsistency(format!("removed chain block {removed} is not the chain tip {tip}")));
            }
            self.access_index_by_hash.delete(area, removed)?;
            self.access_hash_by_index.delete(area, highest_index.into())?;
            highest_index = highest_index
                .checked_sub(1)
                .ok_or_else(|| StoreError::DataInconsistency("cannot remove the chain root".to_string()))?;
            tip = self.access_hash_by_index.read_staged(area, highest_index.into())?;
        }
        for added in changes.added.iter().copied() {
            highest_index += 1;
            self.access_index_by_hash.write(area, added, highest_index)?;
            self.access_hash_by_index.write(area, highest_index.into(), added)?;
            tip = added;
        }
        self.access_highest_index.write(area, &(highest_index, tip))
    }

    fn init_with_pruning_point(&mut self, mut writer: impl DbWriter, block: Hash) -> StoreResult<()> {
        self.access_index_by_hash.write(&mut writer, block, 0)?;
        self.access_hash_by_index.write(&mut writer, 0.into(), block)?;
        self.access_highest_index.write(&mut writer, &(0, block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_database::prelude::DirectDbWriter;

    #[test]
    fn test_chain_reorg() {
        let db = DB::new_memory();
        let mut store = DbSelectedChainStore::new(db.clone(), 16);
        store.init_with_pruning_point(DirectDbWriter::new(&db), 1.into()).unwrap();

        let area = StagingArea::new();
        store.apply_changes(&area, &ChainPath { added: vec![2.into(), 3.into()], removed: vec![] }).unwrap();
        area.commit_to_db(&db).unwrap();
        assert_eq!(store.get_tip().unwrap(), (2, 3.into()));

        let area = StagingArea::new();
        store.apply_changes(&area, &ChainPath { added: vec![4.into()], removed: vec![3.into(), 2.into()] }).unwrap();
        area.commit_to_db(&db).unwrap();
        assert_eq!(store.get_tip().unwrap(), (1, 4.into()));
        assert_eq!(store.get_by_index(1).unwrap(), 4.into());
        assert!(store.get_by_hash(2.into()).unwrap_err().is_key_not_found());
        assert_eq!(store.get_by_hash(1.into()).unwrap(), 0);

        let area = StagingArea::new();
        assert!(store.apply_changes(&area, &ChainPath { added: vec![], removed: vec![9.into()] }).is_err());
    }
}
