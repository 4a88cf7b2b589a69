use kestrel_consensus_core::{BlockHasher, acceptance_data::AcceptanceData};
use kestrel_database::prelude::{CachedDbAccess, DB, DbWriter, StoreError, StoreResult};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;
use std::sync::Arc;

pub trait AcceptanceDataStoreReader {
    fn get(&self, hash: Hash) -> StoreResult<Arc<AcceptanceData>>;
}

pub trait AcceptanceDataStore: AcceptanceDataStoreReader {
    fn insert(&self, writer: impl DbWriter, hash: Hash, acceptance_data: Arc<AcceptanceData>) -> StoreResult<()>;
    fn delete(&self, writer: impl DbWriter, hash: Hash) -> StoreResult<()>;
}

/// Acceptance data of UTXO-verified blocks: for every mergeset block, which of its transactions were accepted
#[derive(Clone)]
pub struct DbAcceptanceDataStore {
    access: CachedDbAccess<Hash, Arc<AcceptanceData>, BlockHasher>,
}

impl DbAcceptanceDataStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self { access: CachedDbAccess::new(db, cache_size, DatabaseStorePrefixes::AcceptanceData.into()) }
    }
}

impl AcceptanceDataStoreReader for DbAcceptanceDataStore {
    fn get(&self, hash: Hash) -> StoreResult<Arc<AcceptanceData>> {
        self.access.read(hash)
    }
}

impl AcceptanceDataStore for DbAcceptanceDataStore {
    fn insert(&self, writer: impl DbWriter, hash: Hash, acceptance_data: Arc<AcceptanceData>) -> StoreResult<()> {
        if self.access.has(hash)? {
            return Err(StoreError::HashAlreadyExists(hash));
        }
        self.access.write(writer, hash, acceptance_data)
    }

    fn delete(&self, writer: impl DbWriter, hash: Hash) -> StoreResult<()> {
        self.access.delete(writer, hash)
    }
}
