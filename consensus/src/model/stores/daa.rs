use kestrel_consensus_core::{BlockHashSet, BlockHasher};
use kestrel_database::prelude::{CachedDbAccess, DB, DbWriter, StoreError, StoreResult};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;
use std::sync::Arc;

pub trait DaaStoreReader {
    /// The mergeset blocks of `hash` which fell outside its DAA window and were not counted in its DAA score
    fn get_mergeset_non_daa(&self, hash: Hash) -> StoreResult<Arc<BlockHashSet>>;
}

pub trait DaaStore: DaaStoreReader {
    // This is append only
    fn insert(&self, writer: impl DbWriter, hash: Hash, mergeset_non_daa: Arc<BlockHashSet>) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct DbDaaStore {
    access: CachedDbAccess<Hash, Arc<BlockHashSet>, BlockHasher>,
}

impl DbDaaStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self { access: CachedDbAccess::new(db, cache_size, DatabaseStorePrefixes::DaaMergeset.into()) }
    }
}

impl DaaStoreReader for DbDaaStore {
    fn get_mergeset_non_daa(&self, hash: Hash) -> StoreResult<Arc<BlockHashSet>> {
        self.access.read(hash)
    }
}

impl DaaStore for DbDaaStore {
    fn insert(&self, writer: impl DbWriter, hash: Hash, mergeset_non_daa: Arc<BlockHashSet>) -> StoreResult<()> {
        if self.access.has(hash)? {
            return Err(StoreError::HashAlreadyExists(hash));
        }
        self.access.write(writer, hash, mergeset_non_daa)
    }
}
