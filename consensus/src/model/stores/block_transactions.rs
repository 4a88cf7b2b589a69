use kestrel_consensus_core::{BlockHasher, tx::Transaction};
use kestrel_database::prelude::{CachedDbAccess, DB, DbWriter, StoreError, StoreResult};
use kestrel_database::registry::DatabaseStorePrefixes;
use kestrel_hashes::Hash;
use std::sync::Arc;

pub trait BlockTransactionsStoreReader {
    fn get(&self, hash: Hash) -> StoreResult<Arc<Vec<Transaction>>>;
    fn has(&self, hash: Hash) -> StoreResult<bool>;
}

pub trait BlockTransactionsStore: BlockTransactionsStoreReader {
    // This is append only
    fn insert(&self, writer: impl DbWriter, hash: Hash, transactions: Arc<Vec<Transaction>>) -> StoreResult<()>;
    fn delete(&self, writer: impl DbWriter, hash: Hash) -> StoreResult<()>;
}

/// A DB + cache implementation of `BlockTransactionsStore` trait, with concurrency support.
#[derive(Clone)]
pub struct DbBlockTransactionsStore {
    access: CachedDbAccess<Hash, Arc<Vec<Transaction>>, BlockHasher>,
}

impl DbBlockTransactionsStore {
    pub fn new(db: Arc<DB>, cache_size: u64) -> Self {
        Self { access: CachedDbAccess::new(db, cache_size, DatabaseStorePrefixes::BlockTransactions.into()) }
    }
}

impl BlockTransactionsStoreReader for DbBlockTransactionsStore {
    fn get(&self, hash: Hash) -> StoreResult<Arc<Vec<Transaction>>> {
        self.access.read(hash)
    }

    fn has(&self, hash: Hash) -> StoreResult<bool> {
        self.access.has(hash)
    }
}

impl BlockTransactionsStore for DbBlockTransactionsStore {
    fn insert(&self, writer: impl DbWriter, hash: Hash, transactions: Arc<Vec<Transaction>>) -> StoreResult<()> {
        if self.access.has(hash)? {
            return Err(StoreError::HashAlreadyExists(hash));
        }
        self.access.write(writer, hash, transactions)
    }

    fn delete(&self, writer: impl DbWriter, hash: Hash) -> StoreResult<()> {
        self.access.delete(writer, hash)
    }
}
