use kestrel_consensus_core::{BlockHasher, blockstatus::BlockStatus};
use kestrel_database::prelude::{CachedDbAccess, DB, DbWriter, StoreResult};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;
use std::sync::Arc;

/// Reader API for `StatusesStore`.
pub trait StatusesStoreReader {
    fn get(&self, hash: Hash) -> StoreResult<BlockStatus>;
    fn has(&self, hash: Hash) -> StoreResult<bool>;
}

/// Write API for `StatusesStore`. Unlike most stores, statuses are overwritten as a block
/// progresses through the pipeline, so writers are expected to be serialized by the caller
pub trait StatusesStore: StatusesStoreReader {
    fn set(&self, writer: impl DbWriter, hash: Hash, status: BlockStatus) -> StoreResult<()>;
}

/// A DB + cache implementation of `StatusesStore` trait, with concurrent readers support.
#[derive(Clone)]
pub struct DbStatusesStore {
    access: CachedDbAccess<Hash, BlockStatus, BlockHasher>,
}

impl DbStatusesStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self { access: CachedDbAccess::new(db, cache_size, DatabaseStorePrefixes::Statuses.into()) }
    }
}

impl StatusesStoreReader for DbStatusesStore {
    fn get(&self, hash: Hash) -> StoreResult<BlockStatus> {
        self.access.read(hash)
    }

    fn has(&self, hash: Hash) -> StoreResult<bool> {
        self.access.has(hash)
    }
}

impl StatusesStore for DbStatusesStore {
    fn set(&self, writer: impl DbWriter, hash: Hash, status: BlockStatus) -> StoreResult<()> {
        self.access.write(writer, hash, status)
    }
}
